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
        user::{CreateFundManagerRequest, SelectThemeRequest, UserListQuery, UserRole},
    },
    services::users::UserService,
    AppState,
};

pub async fn create_fund_manager(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateFundManagerRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_role(&user, &[UserRole::Admin])?;
    let created = UserService::create_fund_manager(&state.db, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "user": created }))))
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Admin, UserRole::FundManager])?;
    let users = UserService::list(&state.db, &user, &query).await?;
    Ok(Json(json!({ "success": true, "users": users })))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Admin, UserRole::FundManager])?;
    let found = UserService::get(&state.db, &user, id).await?;
    Ok(Json(json!({ "success": true, "user": found })))
}

/// Soft delete: the account is deactivated and its sessions revoked.
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Admin])?;
    UserService::soft_delete(&state.db, &user, id).await?;
    Ok(Json(json!({ "success": true, "message": "User deleted" })))
}

pub async fn force_logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&user, &[UserRole::Admin])?;
    let revoked = UserService::force_logout(&state.db, id).await?;
    Ok(Json(json!({ "success": true, "revoked_sessions": revoked })))
}

pub async fn select_theme(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<SelectThemeRequest>,
) -> AppResult<Json<Value>> {
    UserService::set_theme(&state.db, user.user_id, &body.theme).await?;
    Ok(Json(json!({ "success": true, "theme": body.theme.trim() })))
}
