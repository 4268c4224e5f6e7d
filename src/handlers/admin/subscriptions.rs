use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::handlers::me::transition_subscription;
use crate::models::{
    Subscription, SubscriptionFilters, SubscriptionWithAttempts, UpdateSubscriptionStatus,
};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(filters): Query<SubscriptionFilters>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<Subscription>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (subscriptions, total) = queries::list_subscriptions(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated::new(subscriptions, total, limit, offset)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionWithAttempts>> {
    let conn = state.db.get()?;
    let subscription =
        queries::get_subscription(&conn, &id)?.or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    let billing_attempts = queries::list_billing_attempts(&conn, &subscription.id)?;
    Ok(Json(SubscriptionWithAttempts {
        subscription,
        billing_attempts,
    }))
}

pub async fn update_subscription_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateSubscriptionStatus>,
) -> Result<Json<Subscription>> {
    let subscription = {
        let conn = state.db.get()?;
        queries::get_subscription(&conn, &id)?.or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };
    let updated = transition_subscription(&state, &subscription, input.status).await?;
    Ok(Json(updated))
}
