pub mod admin;
pub mod cron;
pub mod dev;
pub mod me;
pub mod public;
pub mod webhooks;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;
use crate::rate_limit::RateLimitConfig;

/// The full HTTP surface.
///
/// Rate limits key on the peer address, so the server must be started with
/// connect info when `rate_limit` is set. Tests pass `None`.
pub fn app(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router {
    let mut app = Router::new()
        // Catalog, guest orders, checkout
        .merge(public::router(rate_limit))
        // Signed-in customers (bearer JWT)
        .merge(me::router(state.clone(), rate_limit))
        // Back office (admin role)
        .merge(admin::router(state.clone()))
        // Gateway callbacks (signature auth)
        .merge(webhooks::router())
        // Scheduler (cron secret)
        .merge(cron::router(state.clone()));

    if state.dev_mode {
        app = app.merge(dev::router());
        tracing::info!("DEV endpoints enabled: POST /dev/token");
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
