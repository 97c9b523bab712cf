pub mod auth;
pub mod email;
pub mod fund_flows;
pub mod funds;
pub mod metrics;
pub mod notifications;
pub mod onboarding;
pub mod reports;
pub mod storage;
pub mod users;
