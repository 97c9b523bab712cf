use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UserRole {
    Admin,
    Investor,
    FundManager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Investor => "investor",
            UserRole::FundManager => "fundManager",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "investor" => Ok(UserRole::Investor),
            "fundManager" => Ok(UserRole::FundManager),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// DB row struct. `role` is stored as TEXT with a CHECK constraint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub subdomain: Option<String>,
    pub referral: Option<Uuid>,
    pub selected_theme: Option<String>,
    pub is_email_verified: bool,
    pub is_active: bool,
    pub is_onboarded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }
}

pub const USER_COLS: &str = "id, name, email, password_hash, role, subdomain, referral, selected_theme,
     is_email_verified, is_active, is_onboarded, created_at, updated_at";

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub subdomain: Option<String>,
    pub referral: Option<Uuid>,
    pub selected_theme: Option<String>,
    pub is_email_verified: bool,
    pub is_onboarded: bool,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
            subdomain: u.subdomain,
            referral: u.referral,
            selected_theme: u.selected_theme,
            is_email_verified: u.is_email_verified,
            is_onboarded: u.is_onboarded,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFundManagerRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub subdomain: String,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectThemeRequest {
    pub theme: String,
}
