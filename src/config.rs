use std::env;

use crate::rate_limit::RateLimitConfig;

/// MercadoPago credentials. Absent when `MERCADOPAGO_ACCESS_TOKEN` is unset.
#[derive(Debug, Clone)]
pub struct MercadoPagoSettings {
    pub access_token: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

/// Stripe credentials. Absent when `STRIPE_SECRET_KEY` is unset.
#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

/// Store-wide pricing and billing rules.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Lowercase ISO currency code used for every price in the catalog
    pub currency: String,
    pub shipping_flat_cents: i64,
    /// Orders with a subtotal at or above this ship free. 0 disables free shipping.
    pub free_shipping_threshold_cents: i64,
    /// Consecutive failed charges before an active subscription becomes past_due
    pub max_failed_attempts: i64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            currency: "ars".to_string(),
            shipping_flat_cents: 0,
            free_shipping_threshold_cents: 0,
            max_failed_attempts: 3,
        }
    }
}

impl StoreSettings {
    pub fn shipping_for(&self, subtotal_cents: i64) -> i64 {
        if self.free_shipping_threshold_cents > 0
            && subtotal_cents >= self.free_shipping_threshold_cents
        {
            0
        } else {
            self.shipping_flat_cents
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Storefront origin buyers return to after paying (defaults to `base_url`)
    pub storefront_url: String,
    pub dev_mode: bool,
    pub auth_jwt_secret: Option<String>,
    pub auth_jwt_audience: String,
    pub bootstrap_admin_email: Option<String>,
    pub mercadopago: Option<MercadoPagoSettings>,
    pub stripe: Option<StripeSettings>,
    /// Sends buyers to gateway sandboxes instead of live checkout pages
    pub payments_test_mode: bool,
    pub store: StoreSettings,
    pub cron_secret: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub webhook_event_retention_days: i64,
    pub webhook_log_retention_days: i64,
    /// Number of pre-migration backups to keep (-1 = all, 0 = disable backups)
    pub migration_backup_count: i32,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KIBBLE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_or("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        let storefront_url = env_nonempty("STOREFRONT_URL")
            .unwrap_or_else(|| base_url.clone())
            .trim_end_matches('/')
            .to_string();

        let mercadopago = env_nonempty("MERCADOPAGO_ACCESS_TOKEN").map(|access_token| {
            MercadoPagoSettings {
                access_token,
                webhook_secret: env_nonempty("MERCADOPAGO_WEBHOOK_SECRET"),
                api_base: env::var("MERCADOPAGO_API_BASE")
                    .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            }
        });

        let stripe = env_nonempty("STRIPE_SECRET_KEY").map(|secret_key| StripeSettings {
            secret_key,
            webhook_secret: env_nonempty("STRIPE_WEBHOOK_SECRET"),
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        });

        let store = StoreSettings {
            currency: env::var("STORE_CURRENCY")
                .unwrap_or_else(|_| "ars".to_string())
                .to_lowercase(),
            shipping_flat_cents: env_or("SHIPPING_FLAT_CENTS", 0),
            free_shipping_threshold_cents: env_or("FREE_SHIPPING_THRESHOLD_CENTS", 0),
            max_failed_attempts: env_or("BILLING_MAX_FAILED_ATTEMPTS", 3i64).max(1),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "kibble.db".to_string()),
            base_url,
            storefront_url,
            dev_mode,
            auth_jwt_secret: env_nonempty("AUTH_JWT_SECRET"),
            auth_jwt_audience: env::var("AUTH_JWT_AUDIENCE")
                .unwrap_or_else(|_| "authenticated".to_string()),
            bootstrap_admin_email: env_nonempty("BOOTSTRAP_ADMIN_EMAIL")
                .map(|e| e.trim().to_lowercase()),
            mercadopago,
            stripe,
            payments_test_mode: env_flag("PAYMENTS_TEST_MODE"),
            store,
            cron_secret: env_nonempty("CRON_SECRET"),
            rate_limit: RateLimitConfig {
                strict_rpm: env_or("RATE_LIMIT_STRICT_RPM", 10),
                standard_rpm: env_or("RATE_LIMIT_STANDARD_RPM", 60),
            },
            webhook_event_retention_days: env_or("WEBHOOK_EVENT_RETENTION_DAYS", 30),
            webhook_log_retention_days: env_or("WEBHOOK_LOG_RETENTION_DAYS", 90),
            migration_backup_count: env_or("MIGRATION_BACKUP_COUNT", 3),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
