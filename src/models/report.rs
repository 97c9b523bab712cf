use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FundReport {
    pub id: Uuid,
    pub fund_id: Uuid,
    pub title: String,
    pub period: Option<String>,
    #[serde(skip_serializing)]
    pub storage_path: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}
