use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "api_logins_total",
        "Login attempts by outcome",
        &["status"]
    ).unwrap();

    pub static ref SIGNUPS_COUNTER: CounterVec = register_counter_vec!(
        "api_investor_signups_total",
        "Investor signups by tenant subdomain",
        &["tenant"]
    ).unwrap();

    pub static ref NOTIFICATIONS_COUNTER: CounterVec = register_counter_vec!(
        "api_notifications_total",
        "Notification rows written, by event",
        &["event"]
    ).unwrap();

    pub static ref NOTIFICATION_EMAILS_COUNTER: CounterVec = register_counter_vec!(
        "api_notification_emails_total",
        "Notification emails by delivery outcome",
        &["status"]
    ).unwrap();

    pub static ref KYC_TRANSITIONS_COUNTER: CounterVec = register_counter_vec!(
        "api_kyc_transitions_total",
        "Applied onboarding/KYC transitions by action and resulting status",
        &["action", "to"]
    ).unwrap();

    pub static ref FLOW_REVIEWS_COUNTER: CounterVec = register_counter_vec!(
        "api_fund_flow_reviews_total",
        "Capital call and distribution reviews",
        &["kind", "outcome"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref USERS_GAUGE: GaugeVec = register_gauge_vec!(
        "portal_users_active_total",
        "Active users by role",
        &["role"]
    ).unwrap();

    pub static ref ONBOARDINGS_GAUGE: GaugeVec = register_gauge_vec!(
        "portal_onboardings_total",
        "Investor onboardings by status and document status",
        &["status", "document_status"]
    ).unwrap();

    pub static ref FUNDS_GAUGE: Gauge = register_gauge!(
        "portal_funds_total",
        "Number of funds"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let user_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT role, COUNT(*)::BIGINT FROM users WHERE is_active = TRUE GROUP BY role",
    )
    .fetch_all(pool)
    .await?;

    USERS_GAUGE.reset();
    for (role, count) in user_counts {
        USERS_GAUGE.with_label_values(&[&role]).set(count as f64);
    }

    let onboarding_counts: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT status, document_status, COUNT(*)::BIGINT
         FROM investor_onboarding
         GROUP BY status, document_status",
    )
    .fetch_all(pool)
    .await?;

    ONBOARDINGS_GAUGE.reset();
    for (status, document_status, count) in onboarding_counts {
        ONBOARDINGS_GAUGE
            .with_label_values(&[&status, &document_status])
            .set(count as f64);
    }

    let funds: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM funds")
        .fetch_one(pool)
        .await?;
    FUNDS_GAUGE.set(funds as f64);

    info!("Metrics: collected");
    Ok(())
}
