use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{auth::AuthenticatedUser, notification::NotificationQuery},
    services::notifications::NotificationService,
    AppState,
};

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<Value>> {
    let notifications = NotificationService::list(&state.db, user.user_id, &query).await?;
    Ok(Json(json!({ "success": true, "notifications": notifications })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    if !NotificationService::mark_read(&state.db, user.user_id, id).await? {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn mark_all_read(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let updated = NotificationService::mark_all_read(&state.db, user.user_id).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    if !NotificationService::delete(&state.db, user.user_id, id).await? {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(Json(json!({ "success": true })))
}
