mod catalog;
mod checkout;
mod orders;

pub use catalog::*;
pub use checkout::*;
pub use orders::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::rate_limit::{RateLimitConfig, standard_layer, strict_layer};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Catalog, guest orders and checkout. Rate limits are per peer IP and need
/// connect info, so they are skipped when `rate_limit` is `None`.
pub fn router(rate_limit: Option<RateLimitConfig>) -> Router<AppState> {
    let mut catalog = Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product));

    let mut purchase = Router::new()
        .route("/orders", post(create_order))
        .route("/checkout", post(create_checkout));

    if let Some(limits) = rate_limit {
        catalog = catalog.route_layer(standard_layer(limits.standard_rpm));
        purchase = purchase.route_layer(strict_layer(limits.strict_rpm));
    }

    Router::new()
        .route("/health", get(health))
        .merge(catalog)
        .merge(purchase)
}
