use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::util::extract_bearer_token;

/// Guard for scheduler-triggered endpoints: `Authorization: Bearer <CRON_SECRET>`.
///
/// With no secret configured the endpoint is unavailable rather than open.
pub async fn require_cron_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let Some(ref secret) = state.cron_secret else {
        tracing::warn!("Cron endpoint called but CRON_SECRET is not configured");
        return Err(AppError::Unavailable("Cron is not configured".into()));
    };

    let provided = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    if !secrets_match(secret, provided) {
        tracing::warn!("Cron endpoint called with an invalid secret");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    // Length is not secret
    expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}
