use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::auth::require_role,
    models::{
        auth::AuthenticatedUser,
        onboarding::{DocumentReviewRequest, OnboardingQuery, OnboardingReviewRequest, UpdateOnboardingFormRequest},
        user::UserRole,
    },
    services::{onboarding::OnboardingService, storage::read_multipart},
    AppState,
};

const REVIEWERS: &[UserRole] = &[UserRole::Admin, UserRole::FundManager];

pub async fn get_my_onboarding(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Investor])?;
    let onboarding = OnboardingService::get_mine(&state.db, user.user_id).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

pub async fn update_my_onboarding(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateOnboardingFormRequest>,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Investor])?;
    let onboarding = OnboardingService::update_form(&state.db, user.user_id, &body).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

/// Multipart fields: `document_type` and `file`.
pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Investor])?;
    let mut upload = read_multipart(multipart).await?;

    let document_type = upload
        .fields
        .remove("document_type")
        .map(|t| t.trim().to_string())
        .ok_or_else(|| AppError::bad_request("document_type is required"))?;
    let file = upload
        .file
        .ok_or_else(|| AppError::bad_request("file is required"))?;

    let onboarding =
        OnboardingService::upload_document(&state.db, &state.storage, user.user_id, &document_type, file).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

pub async fn list_onboardings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<OnboardingQuery>,
) -> AppResult<Json<Value>> {
    require_role(&user, REVIEWERS)?;
    let onboardings = OnboardingService::list(&state.db, &user, &query).await?;
    Ok(Json(json!({ "success": true, "onboardings": onboardings })))
}

pub async fn get_onboarding(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&user, REVIEWERS)?;
    let onboarding = OnboardingService::get(&state.db, &user, user_id).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

pub async fn review_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<DocumentReviewRequest>,
) -> AppResult<Json<Value>> {
    require_role(&user, REVIEWERS)?;
    let onboarding =
        OnboardingService::review_documents(&state.db, &state.notifications, &user, user_id, &body).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

pub async fn review_onboarding(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<OnboardingReviewRequest>,
) -> AppResult<Json<Value>> {
    require_role(&user, REVIEWERS)?;
    let onboarding =
        OnboardingService::review_onboarding(&state.db, &state.notifications, &user, user_id, &body).await?;
    Ok(Json(json!({ "success": true, "onboarding": onboarding })))
}

pub async fn document_url(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((user_id, document_type)): Path<(Uuid, String)>,
) -> AppResult<Json<Value>> {
    let signed = OnboardingService::document_url(&state.db, &state.storage, &user, user_id, &document_type).await?;
    Ok(Json(json!({ "success": true, "url": signed.url, "expires_at": signed.expires_at })))
}
