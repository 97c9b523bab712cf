use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fund {
    pub id: Uuid,
    pub fund_manager_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub currency: String,
    pub target_size: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership row of the `fund_investors` join table, with the investor's name.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FundInvestor {
    pub fund_id: Uuid,
    pub investor_id: Uuid,
    pub investor_name: String,
    pub investor_email: String,
    pub commitment_amount: Decimal,
    pub document_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FundDetail {
    #[serde(flatten)]
    pub fund: Fund,
    pub investors: Vec<FundInvestor>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFundRequest {
    pub name: String,
    pub description: Option<String>,
    pub currency: Option<String>,
    pub target_size: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AddFundInvestorRequest {
    pub investor_id: Uuid,
    pub commitment_amount: Decimal,
}
