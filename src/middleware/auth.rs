use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        auth::{AuthenticatedUser, Claims},
        user::UserRole,
    },
    AppState,
};

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("Invalid Authorization header format"))?;

        let user_id = decode_access_token(token, &state.config.jwt_secret)
            .map_err(|_| AppError::unauthorized("Invalid or expired token"))?;

        // The JWT alone is not enough: the token must still be listed in
        // user_tokens, which is how logout and forced logout revoke it.
        let token_hash = hash_token(token);
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT u.role, u.is_active
             FROM user_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.user_id = $2 AND t.expires_at > NOW()",
        )
        .bind(&token_hash)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;

        let (role, is_active) = row.ok_or_else(|| AppError::unauthorized("Session expired or revoked"))?;
        if !is_active {
            return Err(AppError::unauthorized("Account is disabled"));
        }
        let role: UserRole = role.parse()?;

        Ok(AuthenticatedUser {
            user_id,
            role,
            token_hash,
        })
    }
}

/// Validates signature and expiry, returns the subject.
pub fn decode_access_token(token: &str, secret: &str) -> anyhow::Result<Uuid> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    Ok(data.claims.sub.parse()?)
}

/// SHA-256 hex digest; tokens are never stored in clear.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Per-handler role gate.
pub fn require_role(user: &AuthenticatedUser, allowed: &[UserRole]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::forbidden("Access denied"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::AuthService;

    #[test]
    fn issued_token_decodes_to_its_subject() {
        let user_id = Uuid::new_v4();
        let issued = AuthService::generate_access_token(user_id, UserRole::Investor, "s3cret", 60).unwrap();
        assert_eq!(decode_access_token(&issued.token, "s3cret").unwrap(), user_id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issued = AuthService::generate_access_token(Uuid::new_v4(), UserRole::Admin, "s3cret", 60).unwrap();
        assert!(decode_access_token(&issued.token, "other").is_err());
    }

    #[test]
    fn two_tokens_for_the_same_user_hash_differently() {
        let id = Uuid::new_v4();
        let a = AuthService::generate_access_token(id, UserRole::Admin, "s3cret", 60).unwrap();
        let b = AuthService::generate_access_token(id, UserRole::Admin, "s3cret", 60).unwrap();
        assert_ne!(hash_token(&a.token), hash_token(&b.token));
        assert_eq!(hash_token(&a.token), hash_token(&a.token));
        assert_eq!(hash_token(&a.token).len(), 64);
    }

    #[test]
    fn role_gate() {
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Investor,
            token_hash: String::new(),
        };
        assert!(require_role(&user, &[UserRole::Investor]).is_ok());
        assert_eq!(
            require_role(&user, &[UserRole::Admin, UserRole::FundManager]).unwrap_err().status(),
            axum::http::StatusCode::FORBIDDEN
        );
    }
}
