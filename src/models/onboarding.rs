//! Investor onboarding and the KYC document workflow.
//!
//! Both status fields move only through the transition tables below
//! (`DocumentStatus::apply` and `OnboardingStatus::apply`). Services lock the
//! row, call `apply`, and persist the returned state; a rejected transition
//! writes nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    PendingUpload,
    Submitted,
    UnderReview,
    Approved,
    ReuploadRequested,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentAction {
    Upload,
    StartReview,
    Approve,
    RequestReupload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingAction {
    Approve,
    Reject,
    Reopen,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot {action} when status is {from}")]
    Illegal {
        from: &'static str,
        action: &'static str,
    },
    #[error("Documents must be approved before the onboarding can be approved")]
    DocumentsNotApproved,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::PendingUpload => "pending_upload",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::UnderReview => "under_review",
            DocumentStatus::Approved => "approved",
            DocumentStatus::ReuploadRequested => "reupload_requested",
        }
    }

    /// Document transition table: (state, action) -> state.
    pub fn apply(self, action: DocumentAction) -> Result<DocumentStatus, TransitionError> {
        use DocumentAction as A;
        use DocumentStatus as S;

        match (self, action) {
            (S::PendingUpload | S::Submitted | S::ReuploadRequested, A::Upload) => Ok(S::Submitted),
            (S::Submitted, A::StartReview) => Ok(S::UnderReview),
            (S::Submitted | S::UnderReview, A::Approve) => Ok(S::Approved),
            (S::Submitted | S::UnderReview, A::RequestReupload) => Ok(S::ReuploadRequested),
            (from, action) => Err(TransitionError::Illegal {
                from: from.as_str(),
                action: action.as_str(),
            }),
        }
    }
}

impl DocumentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentAction::Upload => "upload",
            DocumentAction::StartReview => "start_review",
            DocumentAction::Approve => "approve",
            DocumentAction::RequestReupload => "request_reupload",
        }
    }
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStatus::Pending => "pending",
            OnboardingStatus::Approved => "approved",
            OnboardingStatus::Rejected => "rejected",
        }
    }

    /// Onboarding transition table. Approval additionally requires the
    /// documents to be approved.
    pub fn apply(
        self,
        action: OnboardingAction,
        documents: DocumentStatus,
    ) -> Result<OnboardingStatus, TransitionError> {
        use OnboardingAction as A;
        use OnboardingStatus as S;

        match (self, action) {
            (S::Pending, A::Approve) if documents != DocumentStatus::Approved => {
                Err(TransitionError::DocumentsNotApproved)
            }
            (S::Pending, A::Approve) => Ok(S::Approved),
            (S::Pending, A::Reject) => Ok(S::Rejected),
            (S::Rejected, A::Reopen) => Ok(S::Pending),
            (from, action) => Err(TransitionError::Illegal {
                from: from.as_str(),
                action: action.as_str(),
            }),
        }
    }
}

impl OnboardingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingAction::Approve => "approve",
            OnboardingAction::Reject => "reject",
            OnboardingAction::Reopen => "reopen",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_upload" => Ok(DocumentStatus::PendingUpload),
            "submitted" => Ok(DocumentStatus::Submitted),
            "under_review" => Ok(DocumentStatus::UnderReview),
            "approved" => Ok(DocumentStatus::Approved),
            "reupload_requested" => Ok(DocumentStatus::ReuploadRequested),
            _ => Err(anyhow::anyhow!("Unknown document status: {s}")),
        }
    }
}

impl std::str::FromStr for OnboardingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OnboardingStatus::Pending),
            "approved" => Ok(OnboardingStatus::Approved),
            "rejected" => Ok(OnboardingStatus::Rejected),
            _ => Err(anyhow::anyhow!("Unknown onboarding status: {s}")),
        }
    }
}

/// Free-form onboarding answers. Known keys are typed, anything else the
/// client sends is kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnboardingFormData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investor_classification: Option<String>,
    /// document type -> storage path
    #[serde(default)]
    pub documents: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Onboarding row joined with the investor's name, email and referral.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvestorOnboarding {
    pub id: Uuid,
    pub user_id: Uuid,
    pub investor_name: String,
    pub investor_email: String,
    pub fund_manager_id: Option<Uuid>,
    pub status: String,
    pub rejection_note: Option<String>,
    pub document_status: String,
    pub document_note: Option<String>,
    pub form_data: Json<OnboardingFormData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvestorOnboarding {
    pub fn status(&self) -> anyhow::Result<OnboardingStatus> {
        self.status.parse()
    }

    pub fn document_status(&self) -> anyhow::Result<DocumentStatus> {
        self.document_status.parse()
    }
}

/// Column list for `InvestorOnboarding`; expects `investor_onboarding o JOIN users u`.
pub const ONBOARDING_COLS: &str = "o.id, o.user_id, u.name AS investor_name, u.email AS investor_email,
     u.referral AS fund_manager_id, o.status, o.rejection_note, o.document_status, o.document_note,
     o.form_data, o.created_at, o.updated_at";

#[derive(Debug, Deserialize)]
pub struct UpdateOnboardingFormRequest {
    pub jurisdiction: Option<String>,
    pub investor_classification: Option<String>,
    /// Same flat shape as `OnboardingFormData`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentReviewRequest {
    pub action: DocumentAction,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnboardingReviewRequest {
    pub action: OnboardingAction,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnboardingQuery {
    pub status: Option<String>,
    pub document_status: Option<String>,
}
