//! Capital calls and distributions. Both tables have the same columns, so
//! every operation takes a `FlowKind` and formats its table name in.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        fund::Fund,
        fund_flow::{CreateFlowRequest, FlowKind, FlowQuery, FlowStatus, FundFlow, ReviewFlowRequest, FLOW_COLS},
        notification::{Audience, NewActivity},
        user::UserRole,
    },
    services::{
        funds::{can_manage, is_member, load_fund},
        metrics::FLOW_REVIEWS_COUNTER,
        notifications::NotificationService,
    },
};

fn describe(kind: FlowKind, flow: &FundFlow, fund: &Fund) -> String {
    format!(
        "{} of {} {} for {} dated {}",
        kind.label(),
        flow.amount,
        fund.currency,
        fund.name,
        flow.date
    )
}

pub struct FundFlowService;

impl FundFlowService {
    pub async fn create(
        pool: &PgPool,
        notifications: &NotificationService,
        caller: &AuthenticatedUser,
        kind: FlowKind,
        req: &CreateFlowRequest,
    ) -> AppResult<FundFlow> {
        if req.amount <= Decimal::ZERO {
            return Err(AppError::bad_request("Amount must be greater than zero"));
        }

        let mut tx = pool.begin().await?;
        let fund = load_fund(&mut tx, req.fund_id).await?;
        if !can_manage(caller, &fund) {
            return Err(AppError::not_found("Fund not found"));
        }
        if !is_member(&mut tx, fund.id, req.investor_id).await? {
            return Err(AppError::bad_request("Investor does not belong to this fund"));
        }

        let flow = sqlx::query_as::<_, FundFlow>(&format!(
            "INSERT INTO {table} (fund_id, investor_id, amount, date, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {FLOW_COLS}",
            table = kind.table()
        ))
        .bind(fund.id)
        .bind(req.investor_id)
        .bind(req.amount)
        .bind(req.date)
        .bind(caller.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let fan_out = NotificationService::record(
            &mut tx,
            NewActivity {
                event: kind.created_event(),
                actor_id: Some(caller.user_id),
                fund_id: Some(fund.id),
                fund_manager_id: Some(fund.fund_manager_id),
                entity_type: kind.entity_type(),
                entity_id: flow.id,
                message: format!("{} created", describe(kind, &flow, &fund)),
                audience: Audience::Investor(flow.investor_id),
            },
        )
        .await?;

        tx.commit().await?;
        tracing::info!("{} {} created on fund {}", kind.entity_type(), flow.id, fund.id);

        notifications.deliver(fan_out);
        Ok(flow)
    }

    pub async fn list(
        pool: &PgPool,
        caller: &AuthenticatedUser,
        kind: FlowKind,
        query: &FlowQuery,
    ) -> AppResult<Vec<FundFlow>> {
        let (manager, investor) = match caller.role {
            UserRole::Admin => (None, None),
            UserRole::FundManager => (Some(caller.user_id), None),
            UserRole::Investor => (None, Some(caller.user_id)),
        };

        let flows = sqlx::query_as::<_, FundFlow>(&format!(
            "SELECT {cols}
             FROM {table} t
             JOIN funds f ON f.id = t.fund_id
             WHERE ($1::UUID IS NULL OR f.fund_manager_id = $1)
               AND ($2::UUID IS NULL OR t.investor_id = $2)
               AND ($3::UUID IS NULL OR t.fund_id = $3)
             ORDER BY t.date DESC, t.created_at DESC",
            cols = prefixed_flow_cols("t"),
            table = kind.table()
        ))
        .bind(manager)
        .bind(investor)
        .bind(query.fund_id)
        .fetch_all(pool)
        .await?;
        Ok(flows)
    }

    /// Approve or reject once, from `pending` only.
    pub async fn review(
        pool: &PgPool,
        notifications: &NotificationService,
        caller: &AuthenticatedUser,
        kind: FlowKind,
        id: Uuid,
        req: &ReviewFlowRequest,
    ) -> AppResult<FundFlow> {
        let mut tx = pool.begin().await?;

        let flow = sqlx::query_as::<_, FundFlow>(&format!(
            "SELECT {FLOW_COLS} FROM {table} WHERE id = $1 FOR UPDATE",
            table = kind.table()
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", kind.label())))?;

        let fund = load_fund(&mut tx, flow.fund_id).await?;
        if !can_manage(caller, &fund) {
            return Err(AppError::not_found(format!("{} not found", kind.label())));
        }

        let current: FlowStatus = flow.status.parse()?;
        let next = current
            .review(req.action)
            .ok_or_else(|| AppError::conflict(format!("{} is already {}", kind.label(), current.as_str())))?;

        let reviewed = sqlx::query_as::<_, FundFlow>(&format!(
            "UPDATE {table}
             SET status = $1, reviewed_by = $2, reviewed_at = NOW()
             WHERE id = $3
             RETURNING {FLOW_COLS}",
            table = kind.table()
        ))
        .bind(next.as_str())
        .bind(caller.user_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let fan_out = NotificationService::record(
            &mut tx,
            NewActivity {
                event: kind.reviewed_event(next),
                actor_id: Some(caller.user_id),
                fund_id: Some(fund.id),
                fund_manager_id: Some(fund.fund_manager_id),
                entity_type: kind.entity_type(),
                entity_id: reviewed.id,
                message: format!("{} {}", describe(kind, &reviewed, &fund), next.as_str()),
                audience: Audience::Investor(reviewed.investor_id),
            },
        )
        .await?;

        tx.commit().await?;

        FLOW_REVIEWS_COUNTER
            .with_label_values(&[kind.entity_type(), next.as_str()])
            .inc();
        tracing::info!("{} {} {} by {}", kind.entity_type(), id, next.as_str(), caller.user_id);

        notifications.deliver(fan_out);
        Ok(reviewed)
    }
}

fn prefixed_flow_cols(alias: &str) -> String {
    FLOW_COLS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn prefixed_columns() {
        let cols = prefixed_flow_cols("t");
        assert!(cols.starts_with("t.id, t.fund_id, t.investor_id"));
        assert!(cols.ends_with("t.updated_at"));
        assert!(!cols.contains('\n'));
    }

    #[test]
    fn description_mentions_amount_currency_and_date() {
        let fund = Fund {
            id: Uuid::new_v4(),
            fund_manager_id: Uuid::new_v4(),
            name: "Fund I".into(),
            description: None,
            currency: "EUR".into(),
            target_size: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let flow = FundFlow {
            id: Uuid::new_v4(),
            fund_id: fund.id,
            investor_id: Uuid::new_v4(),
            amount: Decimal::new(250_000_00, 2),
            date: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            status: "pending".into(),
            created_by: fund.fund_manager_id,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(
            describe(FlowKind::CapitalCall, &flow, &fund),
            "Capital call of 250000.00 EUR for Fund I dated 2026-03-31"
        );
    }
}
