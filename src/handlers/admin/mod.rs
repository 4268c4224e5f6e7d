mod orders;
mod products;
mod store;
mod subscriptions;

pub use orders::*;
pub use products::*;
pub use store::*;
pub use subscriptions::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::db::AppState;
use crate::middleware::require_admin;

/// Back-office routes. Anonymous callers get 401, signed-in non-admins 403.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/products", get(list_products).post(create_product))
        .route(
            "/admin/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/admin/products/{id}/variants", post(create_variant))
        .route(
            "/admin/products/{id}/variants/{variant_id}",
            delete(delete_variant),
        )
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/{id}", get(get_order))
        .route("/admin/orders/{id}/status", put(update_order_status))
        .route("/admin/subscriptions", get(list_subscriptions))
        .route("/admin/subscriptions/{id}", get(get_subscription))
        .route(
            "/admin/subscriptions/{id}/status",
            put(update_subscription_status),
        )
        .route("/admin/webhook-logs", get(list_webhook_logs))
        .route("/admin/stats", get(get_stats))
        .route("/admin/profiles/{id}/role", put(update_profile_role))
        .route("/admin/schema", get(get_schema))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}
