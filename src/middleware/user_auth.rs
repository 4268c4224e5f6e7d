use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::Profile;
use crate::util::extract_bearer_token;

/// The signed-in profile, inserted into request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub profile: Profile,
}

impl UserContext {
    pub fn user_id(&self) -> &str {
        &self.profile.id
    }
}

/// Verify the bearer token and load (or create) the caller's profile.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Profile> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let verifier = state.auth.as_ref().ok_or_else(|| {
        tracing::warn!("Bearer token presented but AUTH_JWT_SECRET is not configured");
        AppError::Unauthorized
    })?;
    let identity = verifier.verify(token)?;

    let conn = state.db.get()?;
    queries::upsert_profile(
        &conn,
        &identity.user_id,
        &identity.email,
        state.bootstrap_admin_email.as_deref(),
    )
}

pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let profile = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(UserContext { profile });
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let profile = authenticate(&state, request.headers())?;
    if !profile.role.is_admin() {
        tracing::debug!(user = %profile.id, "Non-admin denied admin route");
        return Err(AppError::Forbidden("Admin access required".into()));
    }
    request.extensions_mut().insert(UserContext { profile });
    Ok(next.run(request).await)
}

/// Authenticated user when a bearer token is present; guest otherwise.
///
/// A token that is present but invalid is rejected, not treated as a guest.
pub struct OptionalUser(pub Option<UserContext>);

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        if extract_bearer_token(&parts.headers).is_none() {
            return Ok(OptionalUser(None));
        }
        let profile = authenticate(state, &parts.headers)?;
        Ok(OptionalUser(Some(UserContext { profile })))
    }
}
