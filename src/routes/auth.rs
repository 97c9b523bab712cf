use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    middleware::{rate_limit::check_rate_limit, tenant::ResolvedTenant},
    models::{
        auth::AuthenticatedUser,
        user::{LoginRequest, LoginResponse, SignupRequest, VerifyEmailRequest},
    },
    services::auth::{normalize_email, AuthService},
    AppState,
};

/// 5 attempts per email per 15 minutes.
const LOGIN_MAX_ATTEMPTS: u64 = 5;
const LOGIN_WINDOW_SECS: u64 = 15 * 60;

pub async fn login(
    State(state): State<AppState>,
    ResolvedTenant(tenant): ResolvedTenant,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let key = format!("rate:login:{}", normalize_email(&body.email));
    check_rate_limit(&state.redis, &key, LOGIN_MAX_ATTEMPTS, LOGIN_WINDOW_SECS).await?;

    let response = AuthService::login(&state.db, &state.config, tenant.as_ref(), &body).await?;
    Ok(Json(response))
}

pub async fn logout(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    AuthService::logout(&state.db, &user.token_hash).await?;
    Ok(Json(json!({ "success": true, "message": "Logged out" })))
}

/// Investor signup; only possible from a fund manager's portal.
pub async fn signup(
    State(state): State<AppState>,
    ResolvedTenant(tenant): ResolvedTenant,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let tenant = tenant.ok_or_else(|| AppError::bad_request("Signup is only available on a fund manager's portal"))?;

    let user = AuthService::signup(&state.db, &state.config, state.email.clone(), &tenant, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "user": user }))))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Json(body): Json<VerifyEmailRequest>,
) -> AppResult<Json<Value>> {
    AuthService::verify_email(&state.db, &state.config, &body.token).await?;
    Ok(Json(json!({ "success": true, "message": "Email verified" })))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let profile = AuthService::me(&state.db, user.user_id).await?;
    Ok(Json(json!({ "success": true, "user": profile })))
}
