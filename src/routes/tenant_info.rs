use axum::Json;
use serde_json::{json, Value};

use crate::middleware::tenant::ResolvedTenant;

/// Which portal the caller is on. `tenant` is null on the shared portal.
pub async fn get_tenant_info(ResolvedTenant(tenant): ResolvedTenant) -> Json<Value> {
    Json(json!({ "success": true, "tenant": tenant }))
}
