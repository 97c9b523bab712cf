pub mod auth;
pub mod files;
pub mod fund_flows;
pub mod funds;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod onboarding;
pub mod tenant_info;
pub mod users;

use std::any::Any;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{error::AppError, middleware::tenant::host_of, AppState};

/// Uploads (KYC documents, fund reports) are the largest bodies.
pub const BODY_LIMIT_BYTES: usize = 25 * 1024 * 1024;

/// Origins allowed by CORS: the portal domain, any of its subdomains, and
/// localhost for development.
pub fn origin_allowed(origin: &str, base_domain: &str) -> bool {
    let Some(host) = host_of(origin) else {
        return false;
    };
    if host == "localhost" || host == "127.0.0.1" || host.ends_with(".localhost") {
        return true;
    }
    !base_domain.is_empty() && (host == base_domain || host.ends_with(&format!(".{base_domain}")))
}

/// A panicking handler answers like any other internal error.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}

/// Panic guard, tracing, CORS and body limit shared by every route.
pub fn with_layers<S>(routes: Router<S>, base_domain: String) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .map(|o| origin_allowed(o, &base_domain))
            .unwrap_or(false)
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin);

    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}

pub fn router(state: AppState) -> Router {
    let base_domain = state.config.base_domain();

    let routes: Router<AppState> = Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/tenant/info", get(tenant_info::get_tenant_info))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/me", get(auth::me))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/fund-managers", post(users::create_fund_manager))
        .route("/users/me/theme", put(users::select_theme))
        .route("/users/{id}", get(users::get_user).delete(users::delete_user))
        .route("/users/{id}/logout", post(users::force_logout))
        // Onboarding / KYC
        .route("/onboarding", get(onboarding::list_onboardings))
        .route(
            "/onboarding/me",
            get(onboarding::get_my_onboarding).put(onboarding::update_my_onboarding),
        )
        .route("/onboarding/me/documents", post(onboarding::upload_document))
        .route("/onboarding/{user_id}", get(onboarding::get_onboarding))
        .route("/onboarding/{user_id}/documents/review", post(onboarding::review_documents))
        .route("/onboarding/{user_id}/review", post(onboarding::review_onboarding))
        .route(
            "/onboarding/{user_id}/documents/{document_type}/url",
            get(onboarding::document_url),
        )
        // Funds
        .route("/funds", get(funds::list_funds).post(funds::create_fund))
        .route("/funds/{id}", get(funds::get_fund))
        .route("/funds/{id}/investors", post(funds::add_investor))
        .route("/funds/{id}/reports", get(funds::list_reports).post(funds::create_report))
        .route("/fund-reports/{id}/url", get(funds::report_url))
        // Capital calls & distributions
        .route(
            "/capital-calls",
            get(fund_flows::list_capital_calls).post(fund_flows::create_capital_call),
        )
        .route("/capital-calls/{id}/review", post(fund_flows::review_capital_call))
        .route(
            "/distributions",
            get(fund_flows::list_distributions).post(fund_flows::create_distribution),
        )
        .route("/distributions/{id}/review", post(fund_flows::review_distribution))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        // Signed downloads
        .route("/files/{*path}", get(files::serve_file));

    with_layers(routes, base_domain).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_admits_portal_and_tenants() {
        assert!(origin_allowed("https://portal.example", "portal.example"));
        assert!(origin_allowed("https://acme.portal.example", "portal.example"));
        assert!(origin_allowed("http://localhost:5173", "portal.example"));
        assert!(origin_allowed("http://acme.localhost:5173", "portal.example"));
    }

    #[test]
    fn cors_refuses_lookalikes() {
        assert!(!origin_allowed("https://evilportal.example", "portal.example"));
        assert!(!origin_allowed("https://portal.example.evil.com", "portal.example"));
        assert!(!origin_allowed("null", "portal.example"));
    }
}
