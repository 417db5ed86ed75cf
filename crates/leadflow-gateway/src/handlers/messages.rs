//! Enqueue API, consumed by the web layer.

use crate::error::GatewayError;
use crate::server::AppState;
use crate::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use leadflow_core::types::{PhoneNumber, TenantId};
use serde::Deserialize;
use tracing::debug;

/// Parameters for enqueueing an outbound message.
#[derive(Debug, Deserialize)]
pub struct EnqueueMessageParams {
    /// Owning tenant.
    pub tenant_id: String,

    /// Recipient number.
    pub to_number: String,

    /// Sending number; defaults to the tenant's configured number.
    pub from_number: Option<String>,

    /// Message text.
    pub body: String,
}

/// `POST /api/messages` — enqueue a send, respond `202` with the job ID.
pub async fn enqueue_message(
    State(state): State<AppState>,
    Json(params): Json<EnqueueMessageParams>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let tenant_id = TenantId::new(params.tenant_id);
    let context = state
        .tenants
        .resolve(&tenant_id)
        .map_err(|_| GatewayError::UnknownTenant(tenant_id.to_string()))?;

    let to_number = PhoneNumber::new(params.to_number);
    if !to_number.is_valid() {
        return Err(GatewayError::InvalidPayload(format!(
            "invalid to_number '{to_number}'"
        )));
    }
    if params.body.trim().is_empty() {
        return Err(GatewayError::InvalidPayload("empty body".to_string()));
    }

    let from_number = params
        .from_number
        .map(PhoneNumber::new)
        .unwrap_or_else(|| context.from_number.clone());

    let job_id = state
        .queue
        .enqueue_send_message(tenant_id.clone(), to_number, from_number, params.body)
        .await?;

    debug!(tenant = %tenant_id, job_id = %job_id, "Send enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id })),
    ))
}
