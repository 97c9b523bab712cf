use axum::{
    extract::{Path, Query, State},
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
        fund_flow::{CreateFlowRequest, FlowKind, FlowQuery, ReviewFlowRequest},
        user::UserRole,
    },
    services::fund_flows::FundFlowService,
    AppState,
};

const MANAGERS: &[UserRole] = &[UserRole::FundManager, UserRole::Admin];

async fn create(state: AppState, user: AuthenticatedUser, kind: FlowKind, body: CreateFlowRequest) -> AppResult<(StatusCode, Json<Value>)> {
    require_role(&user, MANAGERS)?;
    let flow = FundFlowService::create(&state.db, &state.notifications, &user, kind, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, kind.entity_type(): flow }))))
}

async fn list(state: AppState, user: AuthenticatedUser, kind: FlowKind, query: FlowQuery) -> AppResult<Json<Value>> {
    let flows = FundFlowService::list(&state.db, &user, kind, &query).await?;
    Ok(Json(json!({ "success": true, kind.table(): flows })))
}

async fn review(
    state: AppState,
    user: AuthenticatedUser,
    kind: FlowKind,
    id: Uuid,
    body: ReviewFlowRequest,
) -> AppResult<Json<Value>> {
    require_role(&user, MANAGERS)?;
    let flow = FundFlowService::review(&state.db, &state.notifications, &user, kind, id, &body).await?;
    Ok(Json(json!({ "success": true, kind.entity_type(): flow })))
}

pub async fn create_capital_call(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateFlowRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    create(state, user, FlowKind::CapitalCall, body).await
}

pub async fn list_capital_calls(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<FlowQuery>,
) -> AppResult<Json<Value>> {
    list(state, user, FlowKind::CapitalCall, query).await
}

pub async fn review_capital_call(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewFlowRequest>,
) -> AppResult<Json<Value>> {
    review(state, user, FlowKind::CapitalCall, id, body).await
}

pub async fn create_distribution(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateFlowRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    create(state, user, FlowKind::Distribution, body).await
}

pub async fn list_distributions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<FlowQuery>,
) -> AppResult<Json<Value>> {
    list(state, user, FlowKind::Distribution, query).await
}

pub async fn review_distribution(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewFlowRequest>,
) -> AppResult<Json<Value>> {
    review(state, user, FlowKind::Distribution, id, body).await
}
