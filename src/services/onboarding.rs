//! Onboarding persistence. Every status change locks the row, runs the
//! transition table from `models::onboarding`, and only then writes.

use sqlx::{types::Json, PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        notification::{Audience, NewActivity, NotificationEvent},
        onboarding::{
            DocumentAction, DocumentReviewRequest, DocumentStatus, InvestorOnboarding, OnboardingAction,
            OnboardingQuery, OnboardingReviewRequest, OnboardingStatus, UpdateOnboardingFormRequest,
            ONBOARDING_COLS,
        },
        user::UserRole,
    },
    services::{
        metrics::KYC_TRANSITIONS_COUNTER,
        notifications::NotificationService,
        storage::{FileStorage, SignedUrl, UploadedFile},
    },
};

pub const ALLOWED_DOCUMENT_MIME_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

const ENTITY_TYPE: &str = "investor_onboarding";

/// Keys of the form data the investor cannot overwrite through `extra`.
const RESERVED_FORM_KEYS: &[&str] = &["jurisdiction", "investor_classification", "documents"];

pub fn is_valid_document_type(s: &str) -> bool {
    (1..=64).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Declared content type if accepted, else the one guessed from the filename.
pub fn accepted_mime(file: &UploadedFile) -> Option<String> {
    let declared = file.content_type.to_ascii_lowercase();
    if ALLOWED_DOCUMENT_MIME_TYPES.contains(&declared.as_str()) {
        return Some(declared);
    }
    let guessed = mime_guess::from_path(&file.filename).first_or_octet_stream();
    let guessed = guessed.essence_str();
    ALLOWED_DOCUMENT_MIME_TYPES.contains(&guessed).then(|| guessed.to_string())
}

/// Admins review every onboarding, fund managers those of the investors they
/// referred.
pub fn can_review(caller: &AuthenticatedUser, onboarding: &InvestorOnboarding) -> bool {
    match caller.role {
        UserRole::Admin => true,
        UserRole::FundManager => onboarding.fund_manager_id == Some(caller.user_id),
        UserRole::Investor => false,
    }
}

fn document_event(action: DocumentAction) -> Option<NotificationEvent> {
    match action {
        DocumentAction::StartReview => Some(NotificationEvent::KycDocumentsUnderReview),
        DocumentAction::Approve => Some(NotificationEvent::KycDocumentsApproved),
        DocumentAction::RequestReupload => Some(NotificationEvent::KycReuploadRequested),
        DocumentAction::Upload => None,
    }
}

fn onboarding_event(action: OnboardingAction) -> NotificationEvent {
    match action {
        OnboardingAction::Approve => NotificationEvent::OnboardingApproved,
        OnboardingAction::Reject => NotificationEvent::OnboardingRejected,
        OnboardingAction::Reopen => NotificationEvent::OnboardingReopened,
    }
}

/// Approval clears the document note and a re-upload request stores one;
/// starting a review leaves it alone.
fn review_sets_note(action: DocumentAction) -> bool {
    matches!(action, DocumentAction::Approve | DocumentAction::RequestReupload)
}

fn required_note(note: Option<&str>, what: &str) -> Result<String, AppError> {
    note.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("A note is required to {what}")))
}

fn with_note(message: &str, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{message}. Note: {note}"),
        None => message.to_string(),
    }
}

async fn fetch(conn: &mut PgConnection, user_id: Uuid, lock: bool) -> AppResult<InvestorOnboarding> {
    let lock_clause = if lock { "FOR UPDATE OF o" } else { "" };
    sqlx::query_as::<_, InvestorOnboarding>(&format!(
        "SELECT {ONBOARDING_COLS}
         FROM investor_onboarding o
         JOIN users u ON u.id = o.user_id
         WHERE o.user_id = $1 AND u.is_active = TRUE
         {lock_clause}"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Onboarding not found"))
}

pub struct OnboardingService;

impl OnboardingService {
    pub async fn get_mine(pool: &PgPool, user_id: Uuid) -> AppResult<InvestorOnboarding> {
        let mut conn = pool.acquire().await?;
        fetch(&mut conn, user_id, false).await
    }

    /// Form answers may change until the onboarding leaves `pending` or the
    /// documents are approved.
    pub async fn update_form(
        pool: &PgPool,
        user_id: Uuid,
        req: &UpdateOnboardingFormRequest,
    ) -> AppResult<InvestorOnboarding> {
        let mut tx = pool.begin().await?;
        let current = fetch(&mut tx, user_id, true).await?;

        if current.status()? != OnboardingStatus::Pending || current.document_status()? == DocumentStatus::Approved {
            return Err(AppError::conflict("Onboarding can no longer be edited"));
        }

        let mut form = current.form_data.0;
        if let Some(j) = &req.jurisdiction {
            form.jurisdiction = Some(j.trim().to_string());
        }
        if let Some(c) = &req.investor_classification {
            form.investor_classification = Some(c.trim().to_string());
        }
        for (key, value) in &req.extra {
            if !RESERVED_FORM_KEYS.contains(&key.as_str()) {
                form.extra.insert(key.clone(), value.clone());
            }
        }

        sqlx::query("UPDATE investor_onboarding SET form_data = $1 WHERE user_id = $2")
            .bind(Json(&form))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let updated = fetch(&mut tx, user_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Stores the file, then moves the documents to `submitted`. The stored
    /// file is removed again if the transition is refused.
    pub async fn upload_document(
        pool: &PgPool,
        storage: &FileStorage,
        user_id: Uuid,
        document_type: &str,
        file: UploadedFile,
    ) -> AppResult<InvestorOnboarding> {
        if !is_valid_document_type(document_type) {
            return Err(AppError::bad_request("Invalid document_type"));
        }
        if file.bytes.is_empty() {
            return Err(AppError::bad_request("Uploaded file is empty"));
        }
        if accepted_mime(&file).is_none() {
            return Err(AppError::bad_request("Only PDF, PNG and JPEG documents are accepted"));
        }

        let path = storage.save(user_id, "kyc", &file.filename, &file.bytes).await?;

        match Self::attach_document(pool, user_id, document_type, &path).await {
            Ok(onboarding) => Ok(onboarding),
            Err(e) => {
                storage.remove(&path).await;
                Err(e)
            }
        }
    }

    async fn attach_document(
        pool: &PgPool,
        user_id: Uuid,
        document_type: &str,
        path: &str,
    ) -> AppResult<InvestorOnboarding> {
        let mut tx = pool.begin().await?;
        let current = fetch(&mut tx, user_id, true).await?;

        if current.status()? != OnboardingStatus::Pending {
            return Err(AppError::conflict("Documents can only be uploaded while onboarding is pending"));
        }
        let next = current.document_status()?.apply(DocumentAction::Upload)?;

        let mut form = current.form_data.0;
        let replaced = form.documents.insert(document_type.to_string(), path.to_string());

        sqlx::query(
            "UPDATE investor_onboarding
             SET form_data = $1, document_status = $2, document_note = NULL
             WHERE user_id = $3",
        )
        .bind(Json(&form))
        .bind(next.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch(&mut tx, user_id, false).await?;
        tx.commit().await?;

        KYC_TRANSITIONS_COUNTER
            .with_label_values(&[DocumentAction::Upload.as_str(), next.as_str()])
            .inc();
        if replaced.is_some() {
            tracing::info!("investor {} replaced document {}", user_id, document_type);
        }
        Ok(updated)
    }

    pub async fn list(
        pool: &PgPool,
        caller: &AuthenticatedUser,
        query: &OnboardingQuery,
    ) -> AppResult<Vec<InvestorOnboarding>> {
        let status = query
            .status
            .as_deref()
            .map(|s| s.parse::<OnboardingStatus>().map_err(|e| AppError::bad_request(e.to_string())))
            .transpose()?;
        let document_status = query
            .document_status
            .as_deref()
            .map(|s| s.parse::<DocumentStatus>().map_err(|e| AppError::bad_request(e.to_string())))
            .transpose()?;

        let referral = match caller.role {
            UserRole::Admin => None,
            UserRole::FundManager => Some(caller.user_id),
            UserRole::Investor => return Err(AppError::forbidden("Access denied")),
        };

        let rows = sqlx::query_as::<_, InvestorOnboarding>(&format!(
            "SELECT {ONBOARDING_COLS}
             FROM investor_onboarding o
             JOIN users u ON u.id = o.user_id
             WHERE u.is_active = TRUE
               AND ($1::UUID IS NULL OR u.referral = $1)
               AND ($2::TEXT IS NULL OR o.status = $2)
               AND ($3::TEXT IS NULL OR o.document_status = $3)
             ORDER BY o.updated_at DESC"
        ))
        .bind(referral)
        .bind(status.map(|s| s.as_str()))
        .bind(document_status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(pool: &PgPool, caller: &AuthenticatedUser, user_id: Uuid) -> AppResult<InvestorOnboarding> {
        let mut conn = pool.acquire().await?;
        let onboarding = fetch(&mut conn, user_id, false).await?;
        if !can_review(caller, &onboarding) {
            return Err(AppError::not_found("Onboarding not found"));
        }
        Ok(onboarding)
    }

    pub async fn review_documents(
        pool: &PgPool,
        notifications: &NotificationService,
        caller: &AuthenticatedUser,
        user_id: Uuid,
        req: &DocumentReviewRequest,
    ) -> AppResult<InvestorOnboarding> {
        let event = document_event(req.action)
            .ok_or_else(|| AppError::bad_request("Only the investor can upload documents"))?;
        let note = match req.action {
            DocumentAction::RequestReupload => Some(required_note(req.note.as_deref(), "request a re-upload")?),
            _ => None,
        };

        let mut tx = pool.begin().await?;
        let current = fetch(&mut tx, user_id, true).await?;
        if !can_review(caller, &current) {
            return Err(AppError::not_found("Onboarding not found"));
        }

        let next = current.document_status()?.apply(req.action)?;

        sqlx::query(
            "UPDATE investor_onboarding
             SET document_status = $1,
                 document_note = CASE WHEN $3 THEN $2 ELSE document_note END
             WHERE user_id = $4",
        )
        .bind(next.as_str())
        .bind(note.as_deref())
        .bind(review_sets_note(req.action))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let message = with_note(event.subject(), note.as_deref());
        let fan_out = NotificationService::record(
            &mut tx,
            NewActivity {
                event,
                actor_id: Some(caller.user_id),
                fund_id: None,
                fund_manager_id: current.fund_manager_id,
                entity_type: ENTITY_TYPE,
                entity_id: current.id,
                message,
                audience: Audience::Investor(user_id),
            },
        )
        .await?;

        let updated = fetch(&mut tx, user_id, false).await?;
        tx.commit().await?;

        KYC_TRANSITIONS_COUNTER
            .with_label_values(&[req.action.as_str(), next.as_str()])
            .inc();
        tracing::info!(
            "documents of {} moved {} -> {} by {}",
            user_id,
            current.document_status,
            next.as_str(),
            caller.user_id
        );

        notifications.deliver(fan_out);
        Ok(updated)
    }

    pub async fn review_onboarding(
        pool: &PgPool,
        notifications: &NotificationService,
        caller: &AuthenticatedUser,
        user_id: Uuid,
        req: &OnboardingReviewRequest,
    ) -> AppResult<InvestorOnboarding> {
        let note = match req.action {
            OnboardingAction::Reject => Some(required_note(req.note.as_deref(), "reject an onboarding")?),
            _ => None,
        };

        let mut tx = pool.begin().await?;
        let current = fetch(&mut tx, user_id, true).await?;
        if !can_review(caller, &current) {
            return Err(AppError::not_found("Onboarding not found"));
        }

        let next = current.status()?.apply(req.action, current.document_status()?)?;

        sqlx::query("UPDATE investor_onboarding SET status = $1, rejection_note = $2 WHERE user_id = $3")
            .bind(next.as_str())
            .bind(note.as_deref())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET is_onboarded = $1 WHERE id = $2")
            .bind(next == OnboardingStatus::Approved)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let event = onboarding_event(req.action);
        let fan_out = NotificationService::record(
            &mut tx,
            NewActivity {
                event,
                actor_id: Some(caller.user_id),
                fund_id: None,
                fund_manager_id: current.fund_manager_id,
                entity_type: ENTITY_TYPE,
                entity_id: current.id,
                message: with_note(event.subject(), note.as_deref()),
                audience: Audience::Investor(user_id),
            },
        )
        .await?;

        let updated = fetch(&mut tx, user_id, false).await?;
        tx.commit().await?;

        KYC_TRANSITIONS_COUNTER
            .with_label_values(&[req.action.as_str(), next.as_str()])
            .inc();
        tracing::info!(
            "onboarding of {} moved {} -> {} by {}",
            user_id,
            current.status,
            next.as_str(),
            caller.user_id
        );

        notifications.deliver(fan_out);
        Ok(updated)
    }

    /// Signed URL to one uploaded document. Investors may only fetch their own.
    pub async fn document_url(
        pool: &PgPool,
        storage: &FileStorage,
        caller: &AuthenticatedUser,
        user_id: Uuid,
        document_type: &str,
    ) -> AppResult<SignedUrl> {
        let mut conn = pool.acquire().await?;
        let onboarding = fetch(&mut conn, user_id, false).await?;

        let allowed = caller.user_id == user_id || can_review(caller, &onboarding);
        if !allowed {
            return Err(AppError::not_found("Onboarding not found"));
        }

        let path = onboarding
            .form_data
            .documents
            .get(document_type)
            .ok_or_else(|| AppError::not_found("Document not found"))?;
        Ok(storage.signed_url(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::onboarding::OnboardingFormData;
    use chrono::Utc;

    fn onboarding(fund_manager_id: Option<Uuid>) -> InvestorOnboarding {
        InvestorOnboarding {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            investor_name: "Ada".into(),
            investor_email: "ada@example.com".into(),
            fund_manager_id,
            status: "pending".into(),
            rejection_note: None,
            document_status: "submitted".into(),
            document_note: None,
            form_data: Json(OnboardingFormData::default()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn caller(role: UserRole) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role,
            token_hash: String::new(),
        }
    }

    fn file(name: &str, content_type: &str) -> UploadedFile {
        UploadedFile {
            filename: name.into(),
            content_type: content_type.into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn fund_manager_reviews_only_referred_investors() {
        let fm = caller(UserRole::FundManager);
        assert!(can_review(&fm, &onboarding(Some(fm.user_id))));
        assert!(!can_review(&fm, &onboarding(Some(Uuid::new_v4()))));
        assert!(!can_review(&fm, &onboarding(None)));
    }

    #[test]
    fn admin_reviews_everything_investor_nothing() {
        assert!(can_review(&caller(UserRole::Admin), &onboarding(None)));
        let investor = caller(UserRole::Investor);
        assert!(!can_review(&investor, &onboarding(Some(investor.user_id))));
    }

    #[test]
    fn document_types() {
        assert!(is_valid_document_type("passport"));
        assert!(is_valid_document_type("proof_of_address"));
        assert!(!is_valid_document_type(""));
        assert!(!is_valid_document_type("../passport"));
        assert!(!is_valid_document_type("Passport"));
    }

    #[test]
    fn mime_falls_back_to_extension() {
        assert_eq!(accepted_mime(&file("id.bin", "application/pdf")).as_deref(), Some("application/pdf"));
        assert_eq!(
            accepted_mime(&file("scan.jpg", "application/octet-stream")).as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(accepted_mime(&file("macro.docm", "application/octet-stream")), None);
        assert_eq!(accepted_mime(&file("run.exe", "application/x-msdownload")), None);
    }

    #[test]
    fn reviewers_cannot_upload() {
        assert_eq!(document_event(DocumentAction::Upload), None);
        assert_eq!(
            document_event(DocumentAction::RequestReupload),
            Some(NotificationEvent::KycReuploadRequested)
        );
    }

    #[test]
    fn notes_are_required_and_trimmed() {
        assert_eq!(required_note(Some("  blurry scan "), "x").unwrap(), "blurry scan");
        assert!(required_note(Some("   "), "x").is_err());
        assert!(required_note(None, "x").is_err());
    }

    #[test]
    fn message_carries_the_note() {
        assert_eq!(with_note("Rejected", Some("incomplete")), "Rejected. Note: incomplete");
        assert_eq!(with_note("Approved", None), "Approved");
    }

    #[test]
    fn start_review_keeps_the_note() {
        assert!(!review_sets_note(DocumentAction::StartReview));
        assert!(review_sets_note(DocumentAction::Approve));
        assert!(review_sets_note(DocumentAction::RequestReupload));
    }

    struct Fixture {
        fund_manager: AuthenticatedUser,
        investor_id: Uuid,
        storage: FileStorage,
        notifications: NotificationService,
    }

    async fn fixture(pool: &PgPool) -> Fixture {
        let fm_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (name, email, password_hash, role, subdomain, is_email_verified, is_onboarded)
             VALUES ('Acme Capital', 'ops@acme.test', 'x', 'fundManager', 'acme', TRUE, TRUE)
             RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        let investor_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (name, email, password_hash, role, referral)
             VALUES ('Ada', 'ada@example.com', 'x', 'investor', $1)
             RETURNING id",
        )
        .bind(fm_id)
        .fetch_one(pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO investor_onboarding (user_id) VALUES ($1)")
            .bind(investor_id)
            .execute(pool)
            .await
            .unwrap();

        let config = std::sync::Arc::new(crate::config::test_config());
        Fixture {
            fund_manager: AuthenticatedUser {
                user_id: fm_id,
                role: UserRole::FundManager,
                token_hash: String::new(),
            },
            investor_id,
            storage: FileStorage::new(&config),
            notifications: NotificationService::new(None, config),
        }
    }

    async fn review(pool: &PgPool, f: &Fixture, action: DocumentAction, note: Option<&str>) -> AppResult<InvestorOnboarding> {
        let req = DocumentReviewRequest {
            action,
            note: note.map(str::to_string),
        };
        OnboardingService::review_documents(pool, &f.notifications, &f.fund_manager, f.investor_id, &req).await
    }

    async fn upload(pool: &PgPool, f: &Fixture) -> AppResult<InvestorOnboarding> {
        OnboardingService::upload_document(pool, &f.storage, f.investor_id, "passport", file("passport.pdf", "application/pdf"))
            .await
    }

    async fn activity_count(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM activity_logs")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn documents_move_through_review_to_approved_onboarding(pool: PgPool) {
        let f = fixture(&pool).await;

        let o = upload(&pool, &f).await.unwrap();
        assert_eq!(o.document_status, "submitted");
        assert!(o.form_data.documents.contains_key("passport"));

        let o = review(&pool, &f, DocumentAction::StartReview, None).await.unwrap();
        assert_eq!(o.document_status, "under_review");

        let o = review(&pool, &f, DocumentAction::Approve, None).await.unwrap();
        assert_eq!(o.document_status, "approved");
        assert_eq!(o.document_note, None);

        let err = review(&pool, &f, DocumentAction::Approve, None).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(activity_count(&pool).await, 2);

        let req = OnboardingReviewRequest {
            action: OnboardingAction::Approve,
            note: None,
        };
        let o = OnboardingService::review_onboarding(&pool, &f.notifications, &f.fund_manager, f.investor_id, &req)
            .await
            .unwrap();
        assert_eq!(o.status, "approved");
        let onboarded: bool = sqlx::query_scalar("SELECT is_onboarded FROM users WHERE id = $1")
            .bind(f.investor_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(onboarded);

        let investor_notifications: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_notifications WHERE user_id = $1")
                .bind(f.investor_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(investor_notifications, 3);

        let err = upload(&pool, &f).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn illegal_review_writes_nothing(pool: PgPool) {
        let f = fixture(&pool).await;

        let err = review(&pool, &f, DocumentAction::Approve, None).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);

        let o = OnboardingService::get(&pool, &f.fund_manager, f.investor_id).await.unwrap();
        assert_eq!(o.document_status, "pending_upload");
        assert_eq!(activity_count(&pool).await, 0);
        let notifications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_notifications")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(notifications, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reupload_note_is_stored_then_cleared(pool: PgPool) {
        let f = fixture(&pool).await;
        upload(&pool, &f).await.unwrap();

        let o = review(&pool, &f, DocumentAction::RequestReupload, Some(" blurry scan "))
            .await
            .unwrap();
        assert_eq!(o.document_status, "reupload_requested");
        assert_eq!(o.document_note.as_deref(), Some("blurry scan"));

        let o = upload(&pool, &f).await.unwrap();
        assert_eq!(o.document_status, "submitted");
        assert_eq!(o.document_note, None);

        sqlx::query("UPDATE investor_onboarding SET document_note = 'check expiry' WHERE user_id = $1")
            .bind(f.investor_id)
            .execute(&pool)
            .await
            .unwrap();
        let o = review(&pool, &f, DocumentAction::StartReview, None).await.unwrap();
        assert_eq!(o.document_status, "under_review");
        assert_eq!(o.document_note.as_deref(), Some("check expiry"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn other_fund_managers_cannot_review(pool: PgPool) {
        let f = fixture(&pool).await;
        upload(&pool, &f).await.unwrap();

        let stranger = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::FundManager,
            token_hash: String::new(),
        };
        let req = DocumentReviewRequest {
            action: DocumentAction::StartReview,
            note: None,
        };
        let err = OnboardingService::review_documents(&pool, &f.notifications, &stranger, f.investor_id, &req)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        assert_eq!(activity_count(&pool).await, 0);
    }
}
