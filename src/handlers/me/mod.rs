mod orders;
mod profile;
mod subscriptions;

pub use orders::*;
pub use profile::*;
pub use subscriptions::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::require_user;
use crate::rate_limit::{RateLimitConfig, standard_layer, strict_layer};

/// Routes for the signed-in customer. Every route requires a bearer token.
pub fn router(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router<AppState> {
    let mut account = Router::new()
        .route("/me", get(get_me).put(update_me))
        .route("/me/orders", get(list_my_orders))
        .route("/me/orders/{id}", get(get_my_order))
        .route("/me/subscriptions", get(list_my_subscriptions))
        .route("/me/subscriptions/{id}", get(get_my_subscription))
        .route(
            "/me/subscriptions/{id}/{action}",
            post(change_my_subscription),
        );

    let mut subscribe = Router::new().route("/subscriptions", post(create_subscription));

    if let Some(limits) = rate_limit {
        account = account.route_layer(standard_layer(limits.standard_rpm));
        subscribe = subscribe.route_layer(strict_layer(limits.strict_rpm));
    }

    account
        .merge(subscribe)
        .route_layer(middleware::from_fn_with_state(state, require_user))
}
