use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::UserContext;
use crate::models::{Order, OrderWithItems};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_my_orders(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<Order>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (orders, total) = queries::list_user_orders(&conn, user.user_id(), limit, offset)?;
    Ok(Json(Paginated::new(orders, total, limit, offset)))
}

/// Another user's order is reported as missing, not forbidden.
pub async fn get_my_order(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let order = queries::get_user_order(&conn, user.user_id(), &id)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;
    Ok(Json(order))
}
