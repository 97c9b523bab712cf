use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        notification::{Audience, NewActivity, NotificationEvent},
        report::FundReport,
    },
    services::{
        funds::{can_manage, load_fund, load_visible_fund},
        notifications::NotificationService,
        storage::{FileStorage, MultipartUpload, SignedUrl},
    },
};

const REPORT_COLS: &str = "id, fund_id, title, period, storage_path, created_by, created_at";

pub struct ReportService;

impl ReportService {
    /// Stores the uploaded report and tells every investor of the fund.
    pub async fn create(
        pool: &PgPool,
        storage: &FileStorage,
        notifications: &NotificationService,
        caller: &AuthenticatedUser,
        fund_id: Uuid,
        upload: MultipartUpload,
    ) -> AppResult<FundReport> {
        let title = upload
            .fields
            .get("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::bad_request("title is required"))?;
        let period = upload
            .fields
            .get("period")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let file = upload
            .file
            .filter(|f| !f.bytes.is_empty())
            .ok_or_else(|| AppError::bad_request("A non-empty file is required"))?;

        let fund = {
            let mut conn = pool.acquire().await?;
            load_fund(&mut conn, fund_id).await?
        };
        if !can_manage(caller, &fund) {
            return Err(AppError::not_found("Fund not found"));
        }

        let path = storage.save(fund.id, "reports", &file.filename, &file.bytes).await?;

        let result = async {
            let mut tx = pool.begin().await?;

            let report = sqlx::query_as::<_, FundReport>(&format!(
                "INSERT INTO fund_reports (fund_id, title, period, storage_path, created_by)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {REPORT_COLS}"
            ))
            .bind(fund.id)
            .bind(&title)
            .bind(period.as_deref())
            .bind(&path)
            .bind(caller.user_id)
            .fetch_one(&mut *tx)
            .await?;

            let message = match &report.period {
                Some(period) => format!("New report for {}: {} ({period})", fund.name, report.title),
                None => format!("New report for {}: {}", fund.name, report.title),
            };
            let fan_out = NotificationService::record(
                &mut tx,
                NewActivity {
                    event: NotificationEvent::FundReportCreated,
                    actor_id: Some(caller.user_id),
                    fund_id: Some(fund.id),
                    fund_manager_id: Some(fund.fund_manager_id),
                    entity_type: "fund_report",
                    entity_id: report.id,
                    message,
                    audience: Audience::FundInvestors,
                },
            )
            .await?;

            tx.commit().await?;
            Ok::<_, AppError>((report, fan_out))
        }
        .await;

        let (report, fan_out) = match result {
            Ok(done) => done,
            Err(e) => {
                storage.remove(&path).await;
                return Err(e);
            }
        };

        tracing::info!(
            "report {} published on fund {}, {} recipients",
            report.id,
            fund.id,
            fan_out.recipients.len()
        );
        notifications.deliver(fan_out);
        Ok(report)
    }

    pub async fn list(pool: &PgPool, caller: &AuthenticatedUser, fund_id: Uuid) -> AppResult<Vec<FundReport>> {
        let mut conn = pool.acquire().await?;
        load_visible_fund(&mut conn, caller, fund_id).await?;

        let reports = sqlx::query_as::<_, FundReport>(&format!(
            "SELECT {REPORT_COLS} FROM fund_reports WHERE fund_id = $1 ORDER BY created_at DESC"
        ))
        .bind(fund_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(reports)
    }

    pub async fn signed_url(
        pool: &PgPool,
        storage: &FileStorage,
        caller: &AuthenticatedUser,
        report_id: Uuid,
    ) -> AppResult<SignedUrl> {
        let mut conn = pool.acquire().await?;
        let report = sqlx::query_as::<_, FundReport>(&format!(
            "SELECT {REPORT_COLS} FROM fund_reports WHERE id = $1"
        ))
        .bind(report_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Report not found"))?;

        match load_visible_fund(&mut conn, caller, report.fund_id).await {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => return Err(AppError::not_found("Report not found")),
            Err(e) => return Err(e),
        }

        Ok(storage.signed_url(&report.storage_path))
    }
}
