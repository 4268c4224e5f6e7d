//! HS256 access-token verification.
//!
//! The hosted auth provider signs access tokens with a shared secret. We only
//! verify them; the dev-mode token endpoint is the sole place we mint one.

use std::collections::HashSet;

use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

use super::{AuthClaims, VerifiedIdentity};

/// Tolerated clock drift between us and the auth provider.
const CLOCK_SKEW_SECS: u64 = 30;

/// jwt-simple refuses to sign or verify with HS256 keys under 96 bits.
pub const MIN_SECRET_BYTES: usize = 12;

#[derive(Clone)]
pub struct AuthVerifier {
    key: HS256Key,
    audience: String,
}

impl std::fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthVerifier")
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl AuthVerifier {
    pub fn new(secret: &str, audience: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AppError::Internal(format!(
                "AUTH_JWT_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        Ok(Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
            audience: audience.to_string(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        let mut allowed_audiences = HashSet::new();
        allowed_audiences.insert(self.audience.clone());

        let options = VerificationOptions {
            allowed_audiences: Some(allowed_audiences),
            time_tolerance: Some(Duration::from_secs(CLOCK_SKEW_SECS)),
            ..Default::default()
        };

        let claims = self
            .key
            .verify_token::<AuthClaims>(token, Some(options))
            .map_err(|e| {
                tracing::debug!("Token verification failed: {}", e);
                AppError::Unauthorized
            })?;

        let user_id = claims
            .subject
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthorized)?;
        let email = claims.custom.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::Unauthorized);
        }

        Ok(VerifiedIdentity { user_id, email })
    }

    /// Mint a token the way the auth provider would.
    pub fn issue(&self, user_id: &str, email: &str, valid_for_secs: u64) -> Result<String> {
        let claims = Claims::with_custom_claims(
            AuthClaims {
                email: email.to_string(),
            },
            Duration::from_secs(valid_for_secs),
        )
        .with_subject(user_id)
        .with_audience(&self.audience);

        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }
}
