use serde::{Deserialize, Serialize};

/// Custom claims carried by the auth provider's access tokens.
/// Standard claims (sub, aud, iat, exp) are handled by jwt-simple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub email: String,
}

/// The identity a verified token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Auth provider user id; also the profile id
    pub user_id: String,
    pub email: String,
}
