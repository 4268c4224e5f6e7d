use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kibble::config::Config;
use kibble::db::migrations::run_migrations;
use kibble::db::{AppState, create_pool, queries};
use kibble::handlers;
use kibble::jwt::AuthVerifier;
use kibble::models::{CreateProduct, CreateVariant};
use kibble::payments::{MercadoPagoClient, StripeClient};

#[derive(Parser, Debug)]
#[command(name = "kibble")]
#[command(about = "Pet food storefront backend")]
struct Cli {
    /// Seed the catalog with sample products (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Give an existing profile the admin role, then exit
    #[arg(long, value_name = "EMAIL")]
    grant_admin: Option<String>,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

fn seed_product(
    name: &str,
    category: &str,
    price_cents: i64,
    variants: &[(&str, i64)],
) -> CreateProduct {
    CreateProduct {
        name: name.to_string(),
        description: None,
        category: Some(category.to_string()),
        price_cents,
        image_url: None,
        subscription_enabled: true,
        weekly_discount_pct: 0,
        biweekly_discount_pct: 5,
        monthly_discount_pct: 10,
        bimonthly_discount_pct: 15,
        variants: variants
            .iter()
            .map(|(label, price)| CreateVariant {
                label: label.to_string(),
                price_cents: *price,
                attributes: serde_json::json!({}),
            })
            .collect(),
    }
}

fn seed_dev_data(state: &AppState) {
    let mut conn = state.db.get().expect("Failed to get db connection for seeding");

    let (_, existing) = queries::list_products(&conn, &Default::default(), true, 1, 0)
        .expect("Failed to count products");
    if existing > 0 {
        tracing::info!("Catalog already has products, skipping seed");
        return;
    }

    let catalog = [
        seed_product(
            "Adult Dog Food",
            "dog",
            1_850_000,
            &[("3 kg", 1_850_000), ("15 kg", 7_900_000)],
        ),
        seed_product("Kitten Food", "cat", 1_200_000, &[("1.5 kg", 1_200_000)]),
        seed_product("Dental Chews", "treats", 450_000, &[]),
    ];

    println!();
    println!("============================================================");
    println!("DEV SEED DATA CREATED");
    println!("============================================================");
    for product in &catalog {
        let created = queries::create_product(&mut conn, product).expect("Failed to seed product");
        println!("  {}  {}", created.product.id, created.product.name);
    }
    println!("============================================================");
    println!();
}

fn grant_admin(state: &AppState, email: &str) {
    let conn = state.db.get().expect("Failed to get db connection");
    match queries::grant_admin_by_email(&conn, email) {
        Ok(0) => {
            eprintln!(
                "No profile to promote for {} (unknown, or already admin). Users must sign in once first.",
                email
            );
            std::process::exit(1);
        }
        Ok(n) => println!("Granted admin to {} profile(s) with email {}", n, email),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    }
}

fn spawn_cleanup_task(state: AppState, event_retention_days: i64, log_retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(10 * 60); // 10 minutes

        loop {
            tokio::time::sleep(interval).await;

            let conn = match state.db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                    continue;
                }
            };

            // 0 = keep forever
            if event_retention_days > 0 {
                match queries::purge_old_webhook_events(&conn, event_retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} webhook dedupe keys", count);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Failed to purge webhook events: {}", e),
                }
            }

            if log_retention_days > 0 {
                match queries::purge_old_webhook_logs(&conn, log_retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} webhook log entries", count);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Failed to purge webhook logs: {}", e),
                }
            }
        }
    });

    tracing::info!("Background cleanup task started (runs every 10 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kibble=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");

    {
        let mut conn = db_pool.get().expect("Failed to get connection");
        run_migrations(&mut conn, &config.database_path, config.migration_backup_count)
            .expect("Failed to migrate database");
    }

    let mercadopago = config.mercadopago.as_ref().map(|settings| {
        Arc::new(MercadoPagoClient::new(settings).expect("Failed to build MercadoPago client"))
    });
    let stripe = config.stripe.as_ref().map(|settings| {
        Arc::new(StripeClient::new(settings).expect("Failed to build Stripe client"))
    });
    if mercadopago.is_none() && stripe.is_none() {
        tracing::warn!("No payment gateway configured; checkout will be unavailable");
    }

    let auth = match config.auth_jwt_secret.as_deref() {
        Some(secret) => match AuthVerifier::new(secret, &config.auth_jwt_audience) {
            Ok(verifier) => Some(Arc::new(verifier)),
            Err(e) => {
                eprintln!("ERROR: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };
    if auth.is_none() {
        tracing::warn!("AUTH_JWT_SECRET not set; authenticated routes will return 401");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        storefront_url: config.storefront_url.clone(),
        dev_mode: config.dev_mode,
        store: config.store.clone(),
        mercadopago,
        stripe,
        auth,
        bootstrap_admin_email: config.bootstrap_admin_email.clone(),
        cron_secret: config.cron_secret.clone(),
        payments_test_mode: config.payments_test_mode,
    };

    if let Some(ref email) = cli.grant_admin {
        grant_admin(&state, email);
        return;
    }

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set KIBBLE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_cleanup_task(
        state.clone(),
        config.webhook_event_retention_days,
        config.webhook_log_retention_days,
    );

    let app = handlers::app(state, Some(config.rate_limit));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Kibble server listening on {}", addr);

    // Connect info feeds the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        for path in [
            db_path.clone(),
            format!("{}-wal", db_path),
            format!("{}-shm", db_path),
        ] {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!("Failed to remove {}: {}", path, e);
            }
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
