use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::tenant::is_valid_label,
    models::{
        auth::AuthenticatedUser,
        user::{CreateFundManagerRequest, User, UserListQuery, UserProfile, UserRole, USER_COLS},
    },
    services::auth::{normalize_email, validate_credentials},
};

/// Subdomains no fund manager may claim.
pub const RESERVED_SUBDOMAINS: &[&str] = &["www", "mvp", "api", "admin"];

/// Normalised subdomain, or 400 when it cannot address a tenant.
pub fn validate_subdomain(raw: &str) -> Result<String, AppError> {
    let subdomain = raw.trim().to_lowercase();
    if !is_valid_label(&subdomain) {
        return Err(AppError::bad_request(
            "Subdomain may only contain lowercase letters, digits and hyphens (1-63 characters)",
        ));
    }
    if RESERVED_SUBDOMAINS.contains(&subdomain.as_str()) {
        return Err(AppError::bad_request(format!("Subdomain '{subdomain}' is reserved")));
    }
    Ok(subdomain)
}

pub struct UserService;

impl UserService {
    pub async fn create_fund_manager(pool: &PgPool, req: &CreateFundManagerRequest) -> AppResult<UserProfile> {
        validate_credentials(&req.name, &req.email, &req.password)?;
        let subdomain = validate_subdomain(&req.subdomain)?;
        let email = normalize_email(&req.email);

        let mut tx = pool.begin().await?;

        let subdomain_taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE subdomain = $1)")
                .bind(&subdomain)
                .fetch_one(&mut *tx)
                .await?;
        if subdomain_taken {
            return Err(AppError::conflict("Subdomain already taken"));
        }

        let email_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = $1)")
            .bind(&email)
            .fetch_one(&mut *tx)
            .await?;
        if email_taken {
            return Err(AppError::conflict("Email already registered"));
        }

        let password_hash = bcrypt::hash(&req.password, 12)?;

        // A concurrent insert of the same subdomain still trips the unique
        // index and surfaces as 409.
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash, role, subdomain, is_email_verified, is_onboarded)
             VALUES ($1, $2, $3, 'fundManager', $4, TRUE, TRUE)
             RETURNING {USER_COLS}"
        ))
        .bind(req.name.trim())
        .bind(&email)
        .bind(&password_hash)
        .bind(&subdomain)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("fund manager {} created with subdomain {}", user.id, subdomain);
        Ok(user.into())
    }

    /// Admins see every active user, fund managers their active investors.
    pub async fn list(pool: &PgPool, caller: &AuthenticatedUser, query: &UserListQuery) -> AppResult<Vec<UserProfile>> {
        let users = match caller.role {
            UserRole::Admin => {
                let role = query
                    .role
                    .as_deref()
                    .map(|r| r.parse::<UserRole>().map_err(|e| AppError::bad_request(e.to_string())))
                    .transpose()?;

                sqlx::query_as::<_, User>(&format!(
                    "SELECT {USER_COLS} FROM users
                     WHERE is_active = TRUE AND ($1::TEXT IS NULL OR role = $1)
                     ORDER BY created_at DESC"
                ))
                .bind(role.map(|r| r.as_str()))
                .fetch_all(pool)
                .await?
            }
            UserRole::FundManager => {
                sqlx::query_as::<_, User>(&format!(
                    "SELECT {USER_COLS} FROM users
                     WHERE is_active = TRUE AND role = 'investor' AND referral = $1
                     ORDER BY created_at DESC"
                ))
                .bind(caller.user_id)
                .fetch_all(pool)
                .await?
            }
            UserRole::Investor => return Err(AppError::forbidden("Access denied")),
        };

        Ok(users.into_iter().map(UserProfile::from).collect())
    }

    pub async fn get(pool: &PgPool, caller: &AuthenticatedUser, id: Uuid) -> AppResult<UserProfile> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

        let visible = match caller.role {
            UserRole::Admin => true,
            UserRole::FundManager => user.referral == Some(caller.user_id),
            UserRole::Investor => user.id == caller.user_id,
        };
        if !visible {
            return Err(AppError::not_found("User not found"));
        }
        Ok(user.into())
    }

    /// Deactivates the account and revokes all of its tokens together.
    pub async fn soft_delete(pool: &PgPool, caller: &AuthenticatedUser, id: Uuid) -> AppResult<()> {
        if caller.user_id == id {
            return Err(AppError::bad_request("You cannot delete your own account"));
        }

        let mut tx = pool.begin().await?;

        let res = sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1 AND is_active = TRUE")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::not_found("User not found"));
        }

        let revoked = sqlx::query("DELETE FROM user_tokens WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::info!("user {} deactivated by {}, {} tokens revoked", id, caller.user_id, revoked);
        Ok(())
    }

    /// Drops every token of the user; returns how many were revoked.
    pub async fn force_logout(pool: &PgPool, id: Uuid) -> AppResult<u64> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if !exists {
            return Err(AppError::not_found("User not found"));
        }

        let revoked = sqlx::query("DELETE FROM user_tokens WHERE user_id = $1")
            .bind(id)
            .execute(pool)
            .await?
            .rows_affected();
        tracing::info!("forced logout of {}: {} tokens revoked", id, revoked);
        Ok(revoked)
    }

    pub async fn set_theme(pool: &PgPool, user_id: Uuid, theme: &str) -> AppResult<()> {
        let theme = theme.trim();
        if theme.is_empty() || theme.len() > 64 {
            return Err(AppError::bad_request("Theme must be 1-64 characters"));
        }
        sqlx::query("UPDATE users SET selected_theme = $1 WHERE id = $2")
            .bind(theme)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_is_lowercased_and_trimmed() {
        assert_eq!(validate_subdomain(" Acme-Capital ").unwrap(), "acme-capital");
    }

    #[test]
    fn reserved_subdomains_are_refused() {
        for s in RESERVED_SUBDOMAINS {
            assert_eq!(
                validate_subdomain(s).unwrap_err().status(),
                axum::http::StatusCode::BAD_REQUEST
            );
        }
    }

    #[test]
    fn malformed_subdomains_are_refused() {
        assert!(validate_subdomain("").is_err());
        assert!(validate_subdomain("acme.capital").is_err());
        assert!(validate_subdomain("acme_capital").is_err());
        assert!(validate_subdomain(&"a".repeat(64)).is_err());
    }

    fn fund_manager(email: &str, subdomain: &str) -> CreateFundManagerRequest {
        CreateFundManagerRequest {
            name: "Acme Capital".into(),
            email: email.into(),
            password: "long enough password".into(),
            subdomain: subdomain.into(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn taken_subdomain_is_a_conflict_and_inserts_nothing(pool: PgPool) {
        let created = UserService::create_fund_manager(&pool, &fund_manager("ops@acme.test", "acme"))
            .await
            .unwrap();
        assert_eq!(created.subdomain.as_deref(), Some("acme"));
        assert!(created.is_email_verified);

        let err = UserService::create_fund_manager(&pool, &fund_manager("other@acme.test", " ACME "))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let other: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = 'other@acme.test')")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!other);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn taken_email_is_a_conflict(pool: PgPool) {
        UserService::create_fund_manager(&pool, &fund_manager("ops@acme.test", "acme"))
            .await
            .unwrap();
        let err = UserService::create_fund_manager(&pool, &fund_manager("OPS@acme.test", "beta"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }
}
