use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::auth::require_role,
    models::{
        auth::AuthenticatedUser,
        fund::{AddFundInvestorRequest, CreateFundRequest},
        user::UserRole,
    },
    services::{funds::FundService, reports::ReportService, storage::read_multipart},
    AppState,
};

pub async fn create_fund(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateFundRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_role(&user, &[UserRole::FundManager])?;
    let fund = FundService::create(&state.db, &user, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "fund": fund }))))
}

pub async fn list_funds(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let funds = FundService::list(&state.db, &user).await?;
    Ok(Json(json!({ "success": true, "funds": funds })))
}

pub async fn get_fund(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let fund = FundService::get(&state.db, &user, id).await?;
    Ok(Json(json!({ "success": true, "fund": fund })))
}

pub async fn add_investor(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AddFundInvestorRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_role(&user, &[UserRole::FundManager, UserRole::Admin])?;
    let member = FundService::add_investor(&state.db, &user, id, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "investor": member }))))
}

/// Multipart fields: `title`, optional `period`, `file`.
pub async fn create_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_role(&user, &[UserRole::FundManager, UserRole::Admin])?;
    let upload = read_multipart(multipart).await?;
    let report = ReportService::create(&state.db, &state.storage, &state.notifications, &user, id, upload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "report": report }))))
}

pub async fn list_reports(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let reports = ReportService::list(&state.db, &user, id).await?;
    Ok(Json(json!({ "success": true, "reports": reports })))
}

pub async fn report_url(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let signed = ReportService::signed_url(&state.db, &state.storage, &user, id).await?;
    Ok(Json(json!({ "success": true, "url": signed.url, "expires_at": signed.expires_at })))
}
