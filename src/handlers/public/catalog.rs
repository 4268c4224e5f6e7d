use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{ProductFilters, ProductWithVariants};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_products(
    State(state): State<AppState>,
    Query(filters): Query<ProductFilters>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<ProductWithVariants>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (products, total) = queries::list_products(&conn, &filters, false, limit, offset)?;
    let items = queries::with_variants(&conn, products, true)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductWithVariants>> {
    let conn = state.db.get()?;
    let product = queries::get_active_product(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let variants = queries::list_variants(&conn, &product.id, true)?;
    Ok(Json(ProductWithVariants { product, variants }))
}
