use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A fund manager seen as the tenant that owns a subdomain.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub selected_theme: Option<String>,
}
