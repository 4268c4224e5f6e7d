pub mod common;
pub mod mercadopago;
pub mod stripe;

pub use mercadopago::handle_mercadopago_webhook;
pub use stripe::handle_stripe_webhook;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/mercadopago", post(handle_mercadopago_webhook))
        .route("/webhooks/stripe", post(handle_stripe_webhook))
}
