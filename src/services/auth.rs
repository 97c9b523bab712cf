use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    middleware::auth::hash_token,
    models::{
        auth::{Claims, EmailVerificationClaims},
        tenant::Tenant,
        user::{LoginRequest, LoginResponse, SignupRequest, User, UserProfile, UserRole, USER_COLS},
    },
    services::{
        email::EmailService,
        metrics::{LOGINS_COUNTER, SIGNUPS_COUNTER},
    },
};

const VERIFY_EMAIL_PURPOSE: &str = "verify_email";
const VERIFY_EMAIL_TTL_SECONDS: u64 = 48 * 3600;

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// On a tenant portal only the fund manager, their investors and admins may
/// sign in. Without a tenant anyone may.
pub fn may_sign_in_on(user: &User, tenant: Option<&Tenant>) -> bool {
    let Some(tenant) = tenant else {
        return true;
    };
    match user.role() {
        Some(UserRole::Admin) => true,
        Some(UserRole::FundManager) => user.id == tenant.id,
        Some(UserRole::Investor) => user.referral == Some(tenant.id),
        None => false,
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_credentials(name: &str, email: &str, password: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::bad_request("Name is required"));
    }
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(AppError::bad_request("Invalid email address")),
    }
    if password.len() < 8 {
        return Err(AppError::bad_request("Password must be at least 8 characters"));
    }
    Ok(())
}

pub struct AuthService;

impl AuthService {
    pub async fn login(
        pool: &PgPool,
        config: &Config,
        tenant: Option<&Tenant>,
        req: &LoginRequest,
    ) -> AppResult<LoginResponse> {
        let email = normalize_email(&req.email);

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE LOWER(email) = $1 AND is_active = TRUE"
        ))
        .bind(&email)
        .fetch_optional(pool)
        .await?;

        let Some(user) = user else {
            LOGINS_COUNTER.with_label_values(&["failure"]).inc();
            return Err(AppError::unauthorized("Invalid email or password"));
        };

        if !bcrypt::verify(&req.password, &user.password_hash)? {
            LOGINS_COUNTER.with_label_values(&["failure"]).inc();
            return Err(AppError::unauthorized("Invalid email or password"));
        }

        if !may_sign_in_on(&user, tenant) {
            LOGINS_COUNTER.with_label_values(&["wrong_portal"]).inc();
            tracing::info!("login refused for {} on a foreign portal", user.id);
            return Err(AppError::unauthorized("Invalid email or password"));
        }

        let role = user
            .role()
            .ok_or_else(|| anyhow::anyhow!("user {} has unknown role {}", user.id, user.role))?;
        let issued = Self::generate_access_token(user.id, role, &config.jwt_secret, config.jwt_expiry_seconds)?;

        sqlx::query("INSERT INTO user_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(hash_token(&issued.token))
            .bind(issued.expires_at)
            .execute(pool)
            .await?;

        LOGINS_COUNTER.with_label_values(&["success"]).inc();

        Ok(LoginResponse {
            success: true,
            token: issued.token,
            expires_at: issued.expires_at,
            user: user.into(),
        })
    }

    pub fn generate_access_token(
        user_id: Uuid,
        role: UserRole,
        secret: &str,
        ttl_seconds: u64,
    ) -> anyhow::Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl_seconds as i64);
        let jti = Uuid::new_v4();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            jti: jti.to_string(),
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(IssuedToken { token, jti, expires_at })
    }

    fn generate_verification_token(user_id: Uuid, secret: &str) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = EmailVerificationClaims {
            sub: user_id.to_string(),
            purpose: VERIFY_EMAIL_PURPOSE.to_string(),
            iat: now,
            exp: now + VERIFY_EMAIL_TTL_SECONDS as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Subject of a verification token, if it is valid and was issued for
    /// email verification. Access tokens are refused.
    fn decode_verification_token(token: &str, secret: &str) -> Option<Uuid> {
        let data = decode::<EmailVerificationClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .ok()?;
        if data.claims.purpose != VERIFY_EMAIL_PURPOSE {
            return None;
        }
        data.claims.sub.parse().ok()
    }

    pub async fn logout(pool: &PgPool, token_hash: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM user_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Investor self-signup on a fund manager's portal. The user and its
    /// onboarding row are created together.
    pub async fn signup(
        pool: &PgPool,
        config: &Config,
        email_svc: Option<Arc<EmailService>>,
        tenant: &Tenant,
        req: &SignupRequest,
    ) -> AppResult<UserProfile> {
        validate_credentials(&req.name, &req.email, &req.password)?;
        let email = normalize_email(&req.email);

        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = $1)")
            .bind(&email)
            .fetch_one(pool)
            .await?;
        if taken {
            return Err(AppError::conflict("Email already registered"));
        }

        let password_hash = bcrypt::hash(&req.password, 12)?;

        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash, role, referral)
             VALUES ($1, $2, $3, 'investor', $4)
             RETURNING {USER_COLS}"
        ))
        .bind(req.name.trim())
        .bind(&email)
        .bind(&password_hash)
        .bind(tenant.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO investor_onboarding (user_id, status, document_status)
             VALUES ($1, 'pending', 'pending_upload')",
        )
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        SIGNUPS_COUNTER.with_label_values(&[&tenant.subdomain]).inc();
        tracing::info!("investor {} signed up on {}", user.id, tenant.subdomain);

        if let Some(svc) = email_svc {
            let token = Self::generate_verification_token(user.id, &config.jwt_secret)?;
            let verify_url = format!("{}/verify-email?token={token}", config.tenant_url(&tenant.subdomain));
            let to_email = user.email.clone();
            let to_name = user.name.clone();
            let portal_name = tenant.name.clone();
            tokio::spawn(async move {
                if let Err(e) = svc
                    .send_email_verification(&to_email, &to_name, &verify_url, &portal_name)
                    .await
                {
                    tracing::warn!("verification email to {to_email} failed: {e:#}");
                }
            });
        } else {
            tracing::debug!("SMTP not configured, no verification email for {}", user.id);
        }

        Ok(user.into())
    }

    pub async fn verify_email(pool: &PgPool, config: &Config, token: &str) -> AppResult<()> {
        let user_id = Self::decode_verification_token(token, &config.jwt_secret)
            .ok_or_else(|| AppError::bad_request("Invalid or expired verification link"))?;

        let res = sqlx::query("UPDATE users SET is_email_verified = TRUE WHERE id = $1 AND is_active = TRUE")
            .bind(user_id)
            .execute(pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::not_found("User not found"));
        }
        Ok(())
    }

    pub async fn me(pool: &PgPool, user_id: Uuid) -> AppResult<UserProfile> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str, referral: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test".into(),
            email: "t@example.com".into(),
            password_hash: String::new(),
            role: role.into(),
            subdomain: None,
            referral,
            selected_theme: None,
            is_email_verified: false,
            is_active: true,
            is_onboarded: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn tenant(id: Uuid) -> Tenant {
        Tenant {
            id,
            name: "Acme Capital".into(),
            subdomain: "acme".into(),
            selected_theme: None,
        }
    }

    #[test]
    fn anyone_signs_in_on_the_shared_portal() {
        assert!(may_sign_in_on(&user("investor", None), None));
        assert!(may_sign_in_on(&user("fundManager", None), None));
    }

    #[test]
    fn tenant_portal_admits_its_own_people_and_admins() {
        let fm = user("fundManager", None);
        let t = tenant(fm.id);
        assert!(may_sign_in_on(&fm, Some(&t)));
        assert!(may_sign_in_on(&user("investor", Some(fm.id)), Some(&t)));
        assert!(may_sign_in_on(&user("admin", None), Some(&t)));
    }

    #[test]
    fn tenant_portal_refuses_outsiders() {
        let t = tenant(Uuid::new_v4());
        assert!(!may_sign_in_on(&user("fundManager", None), Some(&t)));
        assert!(!may_sign_in_on(&user("investor", Some(Uuid::new_v4())), Some(&t)));
        assert!(!may_sign_in_on(&user("investor", None), Some(&t)));
    }

    #[test]
    fn verification_token_round_trip() {
        let id = Uuid::new_v4();
        let token = AuthService::generate_verification_token(id, "s3cret").unwrap();
        assert_eq!(AuthService::decode_verification_token(&token, "s3cret"), Some(id));
        assert_eq!(AuthService::decode_verification_token(&token, "other"), None);
    }

    #[test]
    fn access_token_is_not_a_verification_token() {
        let issued = AuthService::generate_access_token(Uuid::new_v4(), UserRole::Investor, "s3cret", 60).unwrap();
        assert_eq!(AuthService::decode_verification_token(&issued.token, "s3cret"), None);
    }

    #[test]
    fn issued_token_expiry_matches_ttl() {
        let before = Utc::now();
        let issued = AuthService::generate_access_token(Uuid::new_v4(), UserRole::Admin, "s3cret", 3600).unwrap();
        let delta = issued.expires_at - before;
        assert!(delta.num_seconds() >= 3599 && delta.num_seconds() <= 3601);
    }

    #[test]
    fn credential_validation() {
        assert!(validate_credentials("Ada", "ada@example.com", "longenough").is_ok());
        assert!(validate_credentials(" ", "ada@example.com", "longenough").is_err());
        assert!(validate_credentials("Ada", "ada.example.com", "longenough").is_err());
        assert!(validate_credentials("Ada", "ada@localhost", "longenough").is_err());
        assert!(validate_credentials("Ada", "ada@example.com", "short").is_err());
    }

    #[test]
    fn emails_are_compared_lowercase() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
