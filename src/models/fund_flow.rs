//! Capital calls and distributions share one shape: money moving between a
//! fund and one of its investors, reviewed once from `pending`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::notification::NotificationEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    CapitalCall,
    Distribution,
}

impl FlowKind {
    /// Table name; only ever one of two literals, safe for `format!` queries.
    pub fn table(&self) -> &'static str {
        match self {
            FlowKind::CapitalCall => "capital_calls",
            FlowKind::Distribution => "distributions",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            FlowKind::CapitalCall => "capital_call",
            FlowKind::Distribution => "distribution",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlowKind::CapitalCall => "Capital call",
            FlowKind::Distribution => "Distribution",
        }
    }

    pub fn created_event(&self) -> NotificationEvent {
        match self {
            FlowKind::CapitalCall => NotificationEvent::CapitalCallCreated,
            FlowKind::Distribution => NotificationEvent::DistributionCreated,
        }
    }

    pub fn reviewed_event(&self, outcome: FlowStatus) -> NotificationEvent {
        match (self, outcome) {
            (FlowKind::CapitalCall, FlowStatus::Approved) => NotificationEvent::CapitalCallApproved,
            (FlowKind::CapitalCall, _) => NotificationEvent::CapitalCallRejected,
            (FlowKind::Distribution, FlowStatus::Approved) => NotificationEvent::DistributionApproved,
            (FlowKind::Distribution, _) => NotificationEvent::DistributionRejected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowReviewAction {
    Approve,
    Reject,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Pending => "pending",
            FlowStatus::Approved => "approved",
            FlowStatus::Rejected => "rejected",
        }
    }

    /// Review is a single step out of `pending`.
    pub fn review(self, action: FlowReviewAction) -> Option<FlowStatus> {
        match (self, action) {
            (FlowStatus::Pending, FlowReviewAction::Approve) => Some(FlowStatus::Approved),
            (FlowStatus::Pending, FlowReviewAction::Reject) => Some(FlowStatus::Rejected),
            _ => None,
        }
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FlowStatus::Pending),
            "approved" => Ok(FlowStatus::Approved),
            "rejected" => Ok(FlowStatus::Rejected),
            _ => Err(anyhow::anyhow!("Unknown status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FundFlow {
    pub id: Uuid,
    pub fund_id: Uuid,
    pub investor_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub status: String,
    pub created_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const FLOW_COLS: &str = "id, fund_id, investor_id, amount, date, status, created_by,
     reviewed_by, reviewed_at, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    pub fund_id: Uuid,
    pub investor_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReviewFlowRequest {
    pub action: FlowReviewAction,
}

#[derive(Debug, Deserialize)]
pub struct FlowQuery {
    pub fund_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_only_leaves_pending() {
        assert_eq!(FlowStatus::Pending.review(FlowReviewAction::Approve), Some(FlowStatus::Approved));
        assert_eq!(FlowStatus::Pending.review(FlowReviewAction::Reject), Some(FlowStatus::Rejected));
        assert_eq!(FlowStatus::Approved.review(FlowReviewAction::Approve), None);
        assert_eq!(FlowStatus::Rejected.review(FlowReviewAction::Approve), None);
    }

    #[test]
    fn review_events_follow_kind_and_outcome() {
        assert_eq!(
            FlowKind::Distribution.reviewed_event(FlowStatus::Approved),
            NotificationEvent::DistributionApproved
        );
        assert_eq!(
            FlowKind::CapitalCall.reviewed_event(FlowStatus::Rejected),
            NotificationEvent::CapitalCallRejected
        );
    }
}
