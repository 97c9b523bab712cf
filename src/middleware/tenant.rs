use std::net::IpAddr;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::{error::AppError, models::tenant::Tenant, AppState};

/// Leftmost labels that address the shared portal rather than a tenant.
pub const NO_TENANT_LABELS: &[&str] = &["www", "mvp"];

/// Mirrors `^[a-z0-9-]{1,63}$`.
pub fn is_valid_label(s: &str) -> bool {
    (1..=63).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Fund-manager tenant resolved from the request's `Origin` (or `Referer`).
/// `None` means the request targets the shared portal.
#[derive(Debug, Clone)]
pub struct ResolvedTenant(pub Option<Tenant>);

impl FromRequestParts<AppState> for ResolvedTenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(label) = requested_label(&parts.headers, &state.config.base_domain())? else {
            return Ok(ResolvedTenant(None));
        };

        // Not cached: every request re-reads the tenant row.
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, subdomain, selected_theme
             FROM users
             WHERE subdomain = $1 AND role = 'fundManager' AND is_active = TRUE",
        )
        .bind(&label)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No portal found for subdomain '{label}'")))?;

        Ok(ResolvedTenant(Some(tenant)))
    }
}

/// Subdomain label that must be looked up, `None` when the request carries no
/// tenant, or 400 when the label is malformed.
pub fn requested_label(headers: &HeaderMap, base_domain: &str) -> Result<Option<String>, AppError> {
    let Some(host) = request_host(headers) else {
        return Ok(None);
    };
    let Some(label) = leftmost_label(&host, base_domain) else {
        return Ok(None);
    };

    if NO_TENANT_LABELS.contains(&label.as_str()) {
        return Ok(None);
    }
    if !is_valid_label(&label) {
        return Err(AppError::bad_request("Invalid tenant subdomain"));
    }
    Ok(Some(label))
}

/// Hostname of the page that issued the request: `Origin`, else `Referer`.
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    [header::ORIGIN, header::REFERER]
        .iter()
        .filter_map(|name| headers.get(name).and_then(|v| v.to_str().ok()))
        .filter(|v| !v.is_empty() && *v != "null")
        .find_map(host_of)
}

/// `https://Acme.portal.example:8443/path` -> `acme.portal.example`
pub fn host_of(url: &str) -> Option<String> {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    // Drop userinfo if any.
    let authority = authority.rsplit('@').next().unwrap_or(authority);

    let host = if authority.starts_with('[') {
        // IPv6 literal
        authority.split(']').next().map(|h| h.trim_start_matches('['))?
    } else {
        authority.split(':').next().unwrap_or(authority)
    };

    let host = host.trim_end_matches('.').to_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Leftmost DNS label when `host` names a subdomain, `None` for the bare
/// portal domain, localhost and IP literals.
pub fn leftmost_label(host: &str, base_domain: &str) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() || host == "localhost" || host == base_domain {
        return None;
    }

    let is_subdomain = (!base_domain.is_empty() && host.ends_with(&format!(".{base_domain}")))
        || host.ends_with(".localhost")
        || host.split('.').count() >= 3;

    if !is_subdomain {
        return None;
    }
    host.split('.').next().map(str::to_string)
}
