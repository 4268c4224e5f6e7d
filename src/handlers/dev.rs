//! Dev-mode helpers. Only mounted when `KIBBLE_ENV=dev`.

use axum::{Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;

/// Tokens minted here are ordinary HS256 tokens; they work until they expire.
const DEV_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct DevTokenRequest {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct DevTokenResponse {
    pub token: String,
    pub expires_in: u64,
}

pub async fn create_dev_token(
    State(state): State<AppState>,
    Json(input): Json<DevTokenRequest>,
) -> Result<Json<DevTokenResponse>> {
    let verifier = state
        .auth
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("AUTH_JWT_SECRET is not configured".into()))?;
    let token = verifier.issue(&input.user_id, &input.email, DEV_TOKEN_TTL_SECS)?;
    tracing::debug!(user = %input.user_id, "Issued dev token");
    Ok(Json(DevTokenResponse {
        token,
        expires_in: DEV_TOKEN_TTL_SECS,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/dev/token", post(create_dev_token))
}
