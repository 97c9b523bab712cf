use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Events that produce an activity-log row and per-user notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    CapitalCallCreated,
    CapitalCallApproved,
    CapitalCallRejected,
    DistributionCreated,
    DistributionApproved,
    DistributionRejected,
    FundReportCreated,
    KycDocumentsUnderReview,
    KycDocumentsApproved,
    KycReuploadRequested,
    OnboardingApproved,
    OnboardingRejected,
    OnboardingReopened,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::CapitalCallCreated => "capital_call_created",
            NotificationEvent::CapitalCallApproved => "capital_call_approved",
            NotificationEvent::CapitalCallRejected => "capital_call_rejected",
            NotificationEvent::DistributionCreated => "distribution_created",
            NotificationEvent::DistributionApproved => "distribution_approved",
            NotificationEvent::DistributionRejected => "distribution_rejected",
            NotificationEvent::FundReportCreated => "fund_report_created",
            NotificationEvent::KycDocumentsUnderReview => "kyc_documents_under_review",
            NotificationEvent::KycDocumentsApproved => "kyc_documents_approved",
            NotificationEvent::KycReuploadRequested => "kyc_reupload_requested",
            NotificationEvent::OnboardingApproved => "onboarding_approved",
            NotificationEvent::OnboardingRejected => "onboarding_rejected",
            NotificationEvent::OnboardingReopened => "onboarding_reopened",
        }
    }

    /// Email subject line.
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationEvent::CapitalCallCreated => "New capital call",
            NotificationEvent::CapitalCallApproved => "Capital call approved",
            NotificationEvent::CapitalCallRejected => "Capital call rejected",
            NotificationEvent::DistributionCreated => "New distribution",
            NotificationEvent::DistributionApproved => "Distribution approved",
            NotificationEvent::DistributionRejected => "Distribution rejected",
            NotificationEvent::FundReportCreated => "New fund report available",
            NotificationEvent::KycDocumentsUnderReview => "Your documents are under review",
            NotificationEvent::KycDocumentsApproved => "Your documents were approved",
            NotificationEvent::KycReuploadRequested => "Please upload your documents again",
            NotificationEvent::OnboardingApproved => "Your onboarding is complete",
            NotificationEvent::OnboardingRejected => "Your onboarding was rejected",
            NotificationEvent::OnboardingReopened => "Your onboarding was reopened",
        }
    }
}

/// Who, besides the fund manager, hears about an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// One investor (capital call, distribution, KYC review).
    Investor(Uuid),
    /// Every investor of the fund (fund report).
    FundInvestors,
}

/// Everything needed to record an event and notify its audience.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub event: NotificationEvent,
    pub actor_id: Option<Uuid>,
    pub fund_id: Option<Uuid>,
    pub fund_manager_id: Option<Uuid>,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub message: String,
    pub audience: Audience,
}

/// A notification as the recipient sees it.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserNotification {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub event: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub fund_id: Option<Uuid>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub unread_only: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
