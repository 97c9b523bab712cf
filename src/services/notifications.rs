//! Notification fan-out: one activity-log row becomes one notification row
//! per recipient, then a detached email per recipient.
//!
//! `record` runs inside the caller's transaction; `deliver` must only be
//! called once that transaction has committed.

use std::{collections::HashSet, sync::Arc};

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::notification::{Audience, NewActivity, NotificationEvent, NotificationQuery, UserNotification},
    services::{email::EmailService, metrics::{NOTIFICATIONS_COUNTER, NOTIFICATION_EMAILS_COUNTER}},
};

/// `(limit, offset)` for a notification page; 20 per page by default, at most 100.
pub fn page_window(query: &NotificationQuery) -> AppResult<(i64, i64)> {
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (query.page.unwrap_or(1).max(1) - 1)
        .checked_mul(per_page)
        .ok_or_else(|| AppError::bad_request("Page is out of range"))?;
    Ok((per_page, offset))
}

pub struct NotificationService {
    email: Option<Arc<EmailService>>,
    config: Arc<Config>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Result of `record`, handed to `deliver` after commit.
#[derive(Debug)]
pub struct FanOut {
    pub activity_id: Uuid,
    pub event: NotificationEvent,
    pub message: String,
    pub recipients: Vec<Recipient>,
    /// Fund manager's display name and subdomain, used to brand the email.
    pub portal: Option<(String, Option<String>)>,
}

/// Fund manager first, then the audience, each user once.
pub fn recipient_ids(fund_manager_id: Option<Uuid>, audience: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    fund_manager_id
        .into_iter()
        .chain(audience.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect()
}

impl NotificationService {
    pub fn new(email: Option<Arc<EmailService>>, config: Arc<Config>) -> Self {
        Self { email, config }
    }

    /// Writes the activity-log row and its notification rows.
    pub async fn record(conn: &mut PgConnection, activity: NewActivity) -> AppResult<FanOut> {
        let activity_id: Uuid = sqlx::query_scalar(
            "INSERT INTO activity_logs (actor_id, fund_id, event, entity_type, entity_id, message)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(activity.actor_id)
        .bind(activity.fund_id)
        .bind(activity.event.as_str())
        .bind(activity.entity_type)
        .bind(activity.entity_id)
        .bind(&activity.message)
        .fetch_one(&mut *conn)
        .await?;

        let audience: Vec<Uuid> = match &activity.audience {
            Audience::Investor(id) => vec![*id],
            Audience::FundInvestors => match activity.fund_id {
                Some(fund_id) => {
                    sqlx::query_scalar(
                        "SELECT investor_id FROM fund_investors
                         WHERE fund_id = $1
                         ORDER BY created_at, investor_id",
                    )
                    .bind(fund_id)
                    .fetch_all(&mut *conn)
                    .await?
                }
                None => Vec::new(),
            },
        };

        let ids = recipient_ids(activity.fund_manager_id, &audience);

        let active: Vec<Recipient> = sqlx::query_as(
            "SELECT id, name, email FROM users WHERE id = ANY($1) AND is_active = TRUE",
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        // Keep recipient order stable: fund manager, then audience order.
        let recipients: Vec<Recipient> = ids
            .iter()
            .filter_map(|id| active.iter().find(|r| r.id == *id).cloned())
            .collect();

        let recipient_ids: Vec<Uuid> = recipients.iter().map(|r| r.id).collect();
        sqlx::query(
            "INSERT INTO user_notifications (activity_id, user_id)
             SELECT $1, UNNEST($2::uuid[])
             ON CONFLICT (activity_id, user_id) DO NOTHING",
        )
        .bind(activity_id)
        .bind(&recipient_ids)
        .execute(&mut *conn)
        .await?;

        let portal: Option<(String, Option<String>)> = match activity.fund_manager_id {
            Some(fm) => {
                sqlx::query_as("SELECT name, subdomain FROM users WHERE id = $1")
                    .bind(fm)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            None => None,
        };

        NOTIFICATIONS_COUNTER
            .with_label_values(&[activity.event.as_str()])
            .inc_by(recipients.len() as f64);

        Ok(FanOut {
            activity_id,
            event: activity.event,
            message: activity.message,
            recipients,
            portal,
        })
    }

    /// Best-effort email delivery, detached from the request. No retries;
    /// failures are logged and counted.
    pub fn deliver(&self, fan_out: FanOut) {
        let Some(email) = self.email.clone() else {
            tracing::debug!(
                "SMTP not configured, skipping {} notification emails for activity {}",
                fan_out.recipients.len(),
                fan_out.activity_id
            );
            return;
        };

        let (portal_name, portal_url) = match &fan_out.portal {
            Some((name, Some(subdomain))) => (name.clone(), self.config.tenant_url(subdomain)),
            Some((name, None)) => (name.clone(), self.config.app_base_url.clone()),
            None => ("Fund Portal".to_string(), self.config.app_base_url.clone()),
        };

        tokio::spawn(async move {
            let subject = fan_out.event.subject();
            for recipient in &fan_out.recipients {
                let result = email
                    .send_notification(
                        &recipient.email,
                        &recipient.name,
                        subject,
                        &fan_out.message,
                        &portal_name,
                        &portal_url,
                    )
                    .await;

                match result {
                    Ok(()) => NOTIFICATION_EMAILS_COUNTER.with_label_values(&["sent"]).inc(),
                    Err(e) => {
                        NOTIFICATION_EMAILS_COUNTER.with_label_values(&["failed"]).inc();
                        tracing::warn!(
                            "notification email for activity {} to {} failed: {e:#}",
                            fan_out.activity_id,
                            recipient.email
                        );
                    }
                }
            }
        });
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> AppResult<Vec<UserNotification>> {
        let (per_page, offset) = page_window(query)?;

        let rows = sqlx::query_as::<_, UserNotification>(
            "SELECT n.id, n.activity_id, a.event, a.entity_type, a.entity_id, a.fund_id,
                    a.message, n.is_read, n.created_at
             FROM user_notifications n
             JOIN activity_logs a ON a.id = n.activity_id
             WHERE n.user_id = $1
               AND n.is_deleted = FALSE
               AND ($2 = FALSE OR n.is_read = FALSE)
             ORDER BY n.created_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(query.unread_only.unwrap_or(false))
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Returns false when the notification is not the user's (or is deleted).
    pub async fn mark_read(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<bool> {
        let res = sqlx::query(
            "UPDATE user_notifications SET is_read = TRUE
             WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn mark_all_read(pool: &PgPool, user_id: Uuid) -> AppResult<u64> {
        let res = sqlx::query(
            "UPDATE user_notifications SET is_read = TRUE
             WHERE user_id = $1 AND is_read = FALSE AND is_deleted = FALSE",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<bool> {
        let res = sqlx::query(
            "UPDATE user_notifications SET is_deleted = TRUE
             WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
