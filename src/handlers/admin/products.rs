use axum::{extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{
    CreateProduct, CreateVariant, ProductFilters, ProductVariant, ProductWithVariants,
    UpdateProduct,
};
use crate::pagination::{Paginated, PaginationQuery};

/// Lists inactive products and variants too.
pub async fn list_products(
    State(state): State<AppState>,
    Query(filters): Query<ProductFilters>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<ProductWithVariants>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (products, total) = queries::list_products(&conn, &filters, true, limit, offset)?;
    let items = queries::with_variants(&conn, products, false)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<ProductWithVariants>)> {
    input.validate()?;
    let mut conn = state.db.get()?;
    let created = queries::create_product(&mut conn, &input)?;
    tracing::info!(product = %created.product.id, variants = created.variants.len(), "Product created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductWithVariants>> {
    let conn = state.db.get()?;
    let product = queries::get_product(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let variants = queries::list_variants(&conn, &product.id, false)?;
    Ok(Json(ProductWithVariants { product, variants }))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<ProductWithVariants>> {
    input.validate()?;
    let conn = state.db.get()?;
    let product = queries::update_product(&conn, &id, &input)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let variants = queries::list_variants(&conn, &product.id, false)?;
    Ok(Json(ProductWithVariants { product, variants }))
}

/// Soft delete: past orders keep pointing at the row.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    if !queries::deactivate_product(&conn, &id)? {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }
    tracing::info!(product = %id, "Product deactivated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_variant(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(input): Json<CreateVariant>,
) -> Result<(StatusCode, Json<ProductVariant>)> {
    input.validate()?;
    let conn = state.db.get()?;
    queries::get_product(&conn, &product_id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let variant = queries::create_variant(&conn, &product_id, &input)?;
    Ok((StatusCode::CREATED, Json(variant)))
}

pub async fn delete_variant(
    State(state): State<AppState>,
    Path((product_id, variant_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    if !queries::deactivate_variant(&conn, &product_id, &variant_id)? {
        return Err(AppError::NotFound(msg::VARIANT_NOT_FOUND.into()));
    }
    Ok(StatusCode::NO_CONTENT)
}
