use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserRole;

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user UUID
    pub role: UserRole,
    pub jti: String, // unique per issued token
    pub exp: usize,
    pub iat: usize,
}

/// Claims of the one-off email verification link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailVerificationClaims {
    pub sub: String,
    pub purpose: String, // always "verify_email"
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from the validated JWT, available via Axum extractors
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
    /// SHA-256 hex of the bearer token, as stored in `user_tokens`.
    pub token_hash: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
