pub mod auth;
pub mod fund;
pub mod fund_flow;
pub mod notification;
pub mod onboarding;
pub mod report;
pub mod tenant;
pub mod user;
