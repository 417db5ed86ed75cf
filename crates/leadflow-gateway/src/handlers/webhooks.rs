//! Inbound webhook endpoints.
//!
//! One endpoint family per provider. Each handler validates the signature
//! or token bound to the tenant's stored credentials, translates the native
//! payload into normalized events, enqueues `sync_inbound` jobs, and
//! responds `200` immediately; reconciliation never runs inline.

use crate::error::GatewayError;
use crate::server::AppState;
use crate::signature::verify_meta_signature;
use crate::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use leadflow_core::types::{CrmLeadEventPayload, InboundEvent, PhoneNumber, TenantId};
use leadflow_providers::webhook::parse_whatsapp_webhook;
use serde::Deserialize;
use tracing::{debug, warn};

/// Meta webhook subscription verification query.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: String,

    #[serde(rename = "hub.verify_token")]
    pub verify_token: String,

    #[serde(rename = "hub.challenge")]
    pub challenge: String,
}

/// `GET /webhooks/whatsapp/:tenant_id` — subscription handshake.
pub async fn verify_subscription(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Result<String> {
    let tenant_id = TenantId::new(tenant_id);
    let context = state
        .tenants
        .resolve(&tenant_id)
        .map_err(|_| GatewayError::UnknownTenant(tenant_id.to_string()))?;

    if params.mode != "subscribe" {
        return Err(GatewayError::Auth("invalid mode".to_string()));
    }
    if params.verify_token != context.webhook.verify_token {
        return Err(GatewayError::Auth("invalid verify token".to_string()));
    }

    Ok(params.challenge)
}

/// `POST /webhooks/whatsapp/:tenant_id` — provider callback ingestion.
pub async fn ingest_whatsapp(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let tenant_id = TenantId::new(tenant_id);
    let context = state
        .tenants
        .resolve(&tenant_id)
        .map_err(|_| GatewayError::UnknownTenant(tenant_id.to_string()))?;

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::InvalidSignature)?;
    if !verify_meta_signature(&context.webhook.app_secret, &body, signature) {
        warn!(tenant = %tenant_id, "Webhook signature rejected");
        return Err(GatewayError::InvalidSignature);
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
    let events = parse_whatsapp_webhook(&tenant_id, &payload)
        .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;

    let received = enqueue_events(&state, &events).await?;
    debug!(tenant = %tenant_id, received, "WhatsApp webhook accepted");
    Ok(Json(serde_json::json!({ "received": received })))
}

/// Bitrix-style CRM lead webhook body.
#[derive(Debug, Deserialize)]
pub struct CrmWebhookBody {
    /// CRM event name, e.g. `ONCRMLEADADD`.
    pub event: String,

    /// CRM event timestamp; part of the dedup key.
    pub ts: String,

    #[serde(alias = "DATA")]
    pub data: CrmWebhookData,

    pub auth: CrmWebhookAuth,
}

#[derive(Debug, Deserialize)]
pub struct CrmWebhookData {
    #[serde(alias = "FIELDS")]
    pub fields: CrmWebhookFields,
}

#[derive(Debug, Deserialize)]
pub struct CrmWebhookFields {
    #[serde(alias = "ID")]
    pub id: String,

    #[serde(default, alias = "PHONE")]
    pub phone: Option<String>,

    #[serde(default, alias = "NAME")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrmWebhookAuth {
    pub application_token: String,
}

/// `POST /webhooks/crm/:tenant_id` — CRM lead event ingestion.
pub async fn ingest_crm(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(body): Json<CrmWebhookBody>,
) -> Result<Json<serde_json::Value>> {
    let tenant_id = TenantId::new(tenant_id);
    let context = state
        .tenants
        .resolve(&tenant_id)
        .map_err(|_| GatewayError::UnknownTenant(tenant_id.to_string()))?;

    let expected = context
        .webhook
        .crm_token
        .as_deref()
        .ok_or_else(|| GatewayError::Auth("CRM webhook not configured".to_string()))?;
    if body.auth.application_token != expected {
        warn!(tenant = %tenant_id, "CRM application token rejected");
        return Err(GatewayError::Auth("invalid application token".to_string()));
    }

    let event = InboundEvent::crm_lead_event(
        tenant_id.clone(),
        format!("bitrix:{}:{}:{}", body.event, body.data.fields.id, body.ts),
        CrmLeadEventPayload {
            crm_id: body.data.fields.id,
            phone: body.data.fields.phone.map(PhoneNumber::new),
            name: body.data.fields.name,
            event: body.event,
        },
    )
    .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;

    let received = enqueue_events(&state, std::slice::from_ref(&event)).await?;
    debug!(tenant = %tenant_id, received, "CRM webhook accepted");
    Ok(Json(serde_json::json!({ "received": received })))
}

/// Enqueue one `sync_inbound` job per normalized event.
async fn enqueue_events(state: &AppState, events: &[InboundEvent]) -> Result<usize> {
    let mut received = 0;
    for event in events {
        state.queue.enqueue_sync_inbound(event).await?;
        received += 1;
    }
    Ok(received)
}
