mod from_row;
pub mod migrations;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::StoreSettings;
use crate::jwt::AuthVerifier;
use crate::payments::{MercadoPagoClient, StripeClient};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL for gateway callbacks (e.g., https://api.example.com)
    pub base_url: String,
    /// Where buyers land after a gateway checkout
    pub storefront_url: String,
    pub dev_mode: bool,
    pub store: StoreSettings,
    pub mercadopago: Option<Arc<MercadoPagoClient>>,
    pub stripe: Option<Arc<StripeClient>>,
    /// None when AUTH_JWT_SECRET is unset; every authenticated route then returns 401
    pub auth: Option<Arc<AuthVerifier>>,
    pub bootstrap_admin_email: Option<String>,
    pub cron_secret: Option<String>,
    pub payments_test_mode: bool,
}

fn configure(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        configure(conn)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
    });
    Pool::builder().max_size(10).build(manager)
}

/// A single-connection pool over a private in-memory database.
///
/// One connection, because every `:memory:` connection is its own database.
pub fn create_memory_pool() -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::memory().with_init(configure);
    Pool::builder().max_size(1).build(manager)
}
