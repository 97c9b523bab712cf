use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        fund::{AddFundInvestorRequest, CreateFundRequest, Fund, FundDetail, FundInvestor},
        user::UserRole,
    },
};

const FUND_COLS: &str = "id, fund_manager_id, name, description, currency, target_size, created_at, updated_at";

/// Writes on a fund (flows, reports, membership) belong to its fund manager;
/// admins may act on any fund.
pub fn can_manage(caller: &AuthenticatedUser, fund: &Fund) -> bool {
    match caller.role {
        UserRole::Admin => true,
        UserRole::FundManager => fund.fund_manager_id == caller.user_id,
        UserRole::Investor => false,
    }
}

/// Three-letter uppercase ISO code, USD when absent.
pub fn normalize_currency(raw: Option<&str>) -> Result<String, AppError> {
    let currency = raw.map(str::trim).filter(|c| !c.is_empty()).unwrap_or("USD").to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::bad_request("Currency must be a three-letter code"));
    }
    Ok(currency)
}

pub(crate) async fn load_fund(conn: &mut PgConnection, id: Uuid) -> AppResult<Fund> {
    sqlx::query_as::<_, Fund>(&format!("SELECT {FUND_COLS} FROM funds WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Fund not found"))
}

pub(crate) async fn is_member(conn: &mut PgConnection, fund_id: Uuid, investor_id: Uuid) -> AppResult<bool> {
    let member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM fund_investors WHERE fund_id = $1 AND investor_id = $2)",
    )
    .bind(fund_id)
    .bind(investor_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(member)
}

/// Any fund a caller may read: their own, one they invest in, or any for admins.
pub(crate) async fn load_visible_fund(conn: &mut PgConnection, caller: &AuthenticatedUser, id: Uuid) -> AppResult<Fund> {
    let fund = load_fund(conn, id).await?;
    let visible = match caller.role {
        UserRole::Admin => true,
        UserRole::FundManager => fund.fund_manager_id == caller.user_id,
        UserRole::Investor => is_member(conn, id, caller.user_id).await?,
    };
    if !visible {
        return Err(AppError::not_found("Fund not found"));
    }
    Ok(fund)
}

pub struct FundService;

impl FundService {
    pub async fn create(pool: &PgPool, caller: &AuthenticatedUser, req: &CreateFundRequest) -> AppResult<Fund> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("Fund name is required"));
        }
        let currency = normalize_currency(req.currency.as_deref())?;
        if req.target_size.is_some_and(|t| t < Decimal::ZERO) {
            return Err(AppError::bad_request("Target size cannot be negative"));
        }

        let fund = sqlx::query_as::<_, Fund>(&format!(
            "INSERT INTO funds (fund_manager_id, name, description, currency, target_size)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {FUND_COLS}"
        ))
        .bind(caller.user_id)
        .bind(name)
        .bind(req.description.as_deref())
        .bind(&currency)
        .bind(req.target_size)
        .fetch_one(pool)
        .await?;

        tracing::info!("fund {} created by {}", fund.id, caller.user_id);
        Ok(fund)
    }

    pub async fn list(pool: &PgPool, caller: &AuthenticatedUser) -> AppResult<Vec<Fund>> {
        let funds = match caller.role {
            UserRole::Admin => {
                sqlx::query_as::<_, Fund>(&format!("SELECT {FUND_COLS} FROM funds ORDER BY created_at DESC"))
                    .fetch_all(pool)
                    .await?
            }
            UserRole::FundManager => {
                sqlx::query_as::<_, Fund>(&format!(
                    "SELECT {FUND_COLS} FROM funds WHERE fund_manager_id = $1 ORDER BY created_at DESC"
                ))
                .bind(caller.user_id)
                .fetch_all(pool)
                .await?
            }
            UserRole::Investor => {
                sqlx::query_as::<_, Fund>(
                    "SELECT f.id, f.fund_manager_id, f.name, f.description, f.currency, f.target_size,
                            f.created_at, f.updated_at
                     FROM funds f
                     JOIN fund_investors fi ON fi.fund_id = f.id
                     WHERE fi.investor_id = $1
                     ORDER BY f.created_at DESC",
                )
                .bind(caller.user_id)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(funds)
    }

    /// Fund with its members. Investors only see their own membership row.
    pub async fn get(pool: &PgPool, caller: &AuthenticatedUser, id: Uuid) -> AppResult<FundDetail> {
        let mut conn = pool.acquire().await?;
        let fund = load_visible_fund(&mut conn, caller, id).await?;

        let only_investor = (caller.role == UserRole::Investor).then_some(caller.user_id);
        let investors = sqlx::query_as::<_, FundInvestor>(
            "SELECT fi.fund_id, fi.investor_id, u.name AS investor_name, u.email AS investor_email,
                    fi.commitment_amount, fi.document_path, fi.created_at
             FROM fund_investors fi
             JOIN users u ON u.id = fi.investor_id
             WHERE fi.fund_id = $1 AND ($2::UUID IS NULL OR fi.investor_id = $2)
             ORDER BY fi.created_at",
        )
        .bind(id)
        .bind(only_investor)
        .fetch_all(&mut *conn)
        .await?;

        Ok(FundDetail { fund, investors })
    }

    /// The investor must be active and referred to the fund's manager.
    pub async fn add_investor(
        pool: &PgPool,
        caller: &AuthenticatedUser,
        fund_id: Uuid,
        req: &AddFundInvestorRequest,
    ) -> AppResult<FundInvestor> {
        if req.commitment_amount < Decimal::ZERO {
            return Err(AppError::bad_request("Commitment amount cannot be negative"));
        }

        let mut tx = pool.begin().await?;
        let fund = load_fund(&mut tx, fund_id).await?;
        if !can_manage(caller, &fund) {
            return Err(AppError::not_found("Fund not found"));
        }

        let eligible: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM users
                WHERE id = $1 AND role = 'investor' AND is_active = TRUE AND referral = $2
             )",
        )
        .bind(req.investor_id)
        .bind(fund.fund_manager_id)
        .fetch_one(&mut *tx)
        .await?;
        if !eligible {
            return Err(AppError::bad_request("Investor is not one of this fund manager's investors"));
        }

        let inserted = sqlx::query(
            "INSERT INTO fund_investors (fund_id, investor_id, commitment_amount)
             VALUES ($1, $2, $3)
             ON CONFLICT (fund_id, investor_id) DO NOTHING",
        )
        .bind(fund_id)
        .bind(req.investor_id)
        .bind(req.commitment_amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(AppError::conflict("Investor already belongs to this fund"));
        }

        let member = sqlx::query_as::<_, FundInvestor>(
            "SELECT fi.fund_id, fi.investor_id, u.name AS investor_name, u.email AS investor_email,
                    fi.commitment_amount, fi.document_path, fi.created_at
             FROM fund_investors fi
             JOIN users u ON u.id = fi.investor_id
             WHERE fi.fund_id = $1 AND fi.investor_id = $2",
        )
        .bind(fund_id)
        .bind(req.investor_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("investor {} added to fund {}", req.investor_id, fund_id);
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fund(owner: Uuid) -> Fund {
        Fund {
            id: Uuid::new_v4(),
            fund_manager_id: owner,
            name: "Fund I".into(),
            description: None,
            currency: "USD".into(),
            target_size: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn caller(role: UserRole) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role,
            token_hash: String::new(),
        }
    }

    #[test]
    fn only_owner_or_admin_manages() {
        let fm = caller(UserRole::FundManager);
        assert!(can_manage(&fm, &fund(fm.user_id)));
        assert!(!can_manage(&fm, &fund(Uuid::new_v4())));
        assert!(can_manage(&caller(UserRole::Admin), &fund(Uuid::new_v4())));
        let investor = caller(UserRole::Investor);
        assert!(!can_manage(&investor, &fund(investor.user_id)));
    }

    #[test]
    fn currency_normalisation() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" eur ")).unwrap(), "EUR");
        assert!(normalize_currency(Some("EURO")).is_err());
        assert!(normalize_currency(Some("E1R")).is_err());
    }
}
