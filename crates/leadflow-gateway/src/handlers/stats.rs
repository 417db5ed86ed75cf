//! Per-tenant observability surface for the dashboard.

use crate::error::GatewayError;
use crate::server::AppState;
use crate::Result;
use axum::extract::{Path, State};
use axum::Json;
use leadflow_core::types::TenantId;
use serde::Serialize;

/// One sending number's externally visible state.
#[derive(Debug, Serialize)]
pub struct NumberStatus {
    pub from_number: String,
    pub warmup_state: String,
    pub daily_limit: i64,
    pub sent_today: i64,
    pub remaining_today: i64,
}

/// `GET /api/tenants/:tenant_id/stats` — job counts and number allowances.
pub async fn tenant_stats(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let tenant_id = TenantId::new(tenant_id);
    state
        .tenants
        .resolve(&tenant_id)
        .map_err(|_| GatewayError::UnknownTenant(tenant_id.to_string()))?;

    let jobs = state.queue.tenant_stats(&tenant_id).await?;
    let numbers: Vec<NumberStatus> = state
        .governor
        .number_status(&tenant_id)
        .await?
        .into_iter()
        .map(|n| NumberStatus {
            from_number: n.from_number.to_string(),
            warmup_state: n.warmup_state.as_str().to_string(),
            daily_limit: n.daily_limit,
            sent_today: n.sent_today,
            remaining_today: n.remaining_today(),
        })
        .collect();

    Ok(Json(serde_json::json!({
        "tenant_id": tenant_id,
        "jobs": jobs,
        "numbers": numbers,
    })))
}
