use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{Order, OrderFilters, OrderWithItems, UpdateOrderStatus};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_orders(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<Order>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (orders, total) = queries::list_orders(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated::new(orders, total, limit, offset)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let order = queries::get_order_with_items(&conn, &id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    Ok(Json(order))
}

/// Fulfilment moves: processing, shipped, delivered, or cancelled.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateOrderStatus>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let current = queries::get_order(&conn, &id)?.or_not_found(msg::ORDER_NOT_FOUND)?;

    if !current.status.can_transition_to(input.status) {
        return Err(AppError::Conflict(format!(
            "Cannot change order from {} to {}",
            current.status, input.status
        )));
    }
    if !queries::update_order_status(&conn, &id, current.status, input.status)? {
        return Err(AppError::Conflict(
            "Order changed while updating; reload and retry".into(),
        ));
    }

    tracing::info!(order = %id, from = %current.status, to = %input.status, "Order status changed");

    let order = queries::get_order_with_items(&conn, &id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    Ok(Json(order))
}
