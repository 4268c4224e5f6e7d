use axum::{Router, extract::State, middleware, routing::post};

use crate::billing::{BillingReport, GatewayCharger, run_billing};
use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::require_cron_secret;

/// Charge every locally billed subscription that is due.
///
/// Called by an external scheduler. Safe to call twice for the same period:
/// charges carry a per-period idempotency key and attempts dedupe by payment id.
pub async fn bill_due_subscriptions(State(state): State<AppState>) -> Result<Json<BillingReport>> {
    let charger = GatewayCharger::new(state.stripe.clone());
    let report = run_billing(&state.db, &state.store, &charger, queries::now()).await?;

    tracing::info!(
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        "Billing run finished"
    );

    Ok(Json(report))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/cron/billing",
            post(bill_due_subscriptions).get(bill_due_subscriptions),
        )
        .route_layer(middleware::from_fn_with_state(state, require_cron_secret))
}
