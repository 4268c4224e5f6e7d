use axum::extract::State;
use serde::Serialize;

use crate::db::{AppState, migrations, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{Profile, StoreStats, UpdateRole, WebhookLog, WebhookLogFilters};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_webhook_logs(
    State(state): State<AppState>,
    Query(filters): Query<WebhookLogFilters>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<WebhookLog>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (logs, total) = queries::list_webhook_logs(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated::new(logs, total, limit, offset)))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StoreStats>> {
    let conn = state.db.get()?;
    Ok(Json(queries::get_store_stats(&conn)?))
}

pub async fn update_profile_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateRole>,
) -> Result<Json<Profile>> {
    let conn = state.db.get()?;
    let profile =
        queries::set_profile_role(&conn, &id, input.role)?.or_not_found(msg::PROFILE_NOT_FOUND)?;
    tracing::info!(profile = %profile.id, role = profile.role.as_str(), "Role changed");
    Ok(Json(profile))
}

#[derive(Debug, Serialize)]
pub struct SchemaStatus {
    pub schema_version: i32,
    pub latest_version: i32,
    pub up_to_date: bool,
}

pub async fn get_schema(State(state): State<AppState>) -> Result<Json<SchemaStatus>> {
    let conn = state.db.get()?;
    let schema_version = migrations::get_version(&conn)?;
    let latest_version = migrations::latest_version();
    Ok(Json(SchemaStatus {
        schema_version,
        latest_version,
        up_to_date: schema_version >= latest_version,
    }))
}
