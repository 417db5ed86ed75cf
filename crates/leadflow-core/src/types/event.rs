//! Normalized inbound events.
//!
//! Webhook endpoints translate each provider's native payload into these
//! events before anything else touches them; the reconciler only ever sees
//! the normalized form.

use super::identifiers::{PhoneNumber, TenantId};
use super::message::DeliveryStatus;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a normalized inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEventKind {
    /// Provider delivery-status update for an outbound message.
    DeliveryReceipt,
    /// Message sent by an end user to a tenant's number.
    InboundMessage,
    /// Lead create/update pushed by an external CRM.
    CrmLeadEvent,
}

impl InboundEventKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundEventKind::DeliveryReceipt => "delivery_receipt",
            InboundEventKind::InboundMessage => "inbound_message",
            InboundEventKind::CrmLeadEvent => "crm_lead_event",
        }
    }

    /// Parse from the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivery_receipt" => Some(InboundEventKind::DeliveryReceipt),
            "inbound_message" => Some(InboundEventKind::InboundMessage),
            "crm_lead_event" => Some(InboundEventKind::CrmLeadEvent),
            _ => None,
        }
    }
}

/// A normalized inbound event.
///
/// `provider_event_id` is the dedup key: applying the same event twice, in
/// any order and at any delay, must leave tenant state unchanged after the
/// first application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub provider_event_id: String,
    pub tenant_id: TenantId,
    pub kind: InboundEventKind,

    /// Kind-specific payload, one of the typed structs below.
    pub payload: serde_json::Value,

    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Build a delivery-receipt event.
    pub fn delivery_receipt(
        tenant_id: TenantId,
        provider_event_id: impl Into<String>,
        payload: DeliveryReceiptEvent,
    ) -> Result<Self> {
        Ok(Self {
            provider_event_id: provider_event_id.into(),
            tenant_id,
            kind: InboundEventKind::DeliveryReceipt,
            payload: serde_json::to_value(payload)?,
            received_at: Utc::now(),
        })
    }

    /// Build an inbound-message event.
    pub fn inbound_message(
        tenant_id: TenantId,
        provider_event_id: impl Into<String>,
        payload: InboundMessageEvent,
    ) -> Result<Self> {
        Ok(Self {
            provider_event_id: provider_event_id.into(),
            tenant_id,
            kind: InboundEventKind::InboundMessage,
            payload: serde_json::to_value(payload)?,
            received_at: Utc::now(),
        })
    }

    /// Build a CRM lead event.
    pub fn crm_lead_event(
        tenant_id: TenantId,
        provider_event_id: impl Into<String>,
        payload: CrmLeadEventPayload,
    ) -> Result<Self> {
        Ok(Self {
            provider_event_id: provider_event_id.into(),
            tenant_id,
            kind: InboundEventKind::CrmLeadEvent,
            payload: serde_json::to_value(payload)?,
            received_at: Utc::now(),
        })
    }
}

/// Payload of a [`InboundEventKind::DeliveryReceipt`] event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceiptEvent {
    /// Provider ID of the outbound message the receipt refers to.
    pub provider_message_id: String,

    /// Reported status.
    pub status: DeliveryStatus,

    /// Recipient number as reported by the provider.
    pub recipient: Option<PhoneNumber>,
}

/// Payload of a [`InboundEventKind::InboundMessage`] event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessageEvent {
    /// Sender's phone number.
    pub from_phone: PhoneNumber,

    /// Sender's profile name, when the provider includes it.
    pub profile_name: Option<String>,

    /// Message text.
    pub text: String,

    /// Provider ID of the inbound message.
    pub provider_message_id: String,

    /// Provider timestamp (unix seconds), when present.
    pub timestamp: Option<i64>,
}

/// Payload of a [`InboundEventKind::CrmLeadEvent`] event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmLeadEventPayload {
    /// Lead ID in the external CRM.
    pub crm_id: String,

    /// Lead phone number; required when no CRM mapping exists yet.
    pub phone: Option<PhoneNumber>,

    /// Lead name, when the CRM sends one.
    pub name: Option<String>,

    /// CRM event name (e.g. `ONCRMLEADADD`).
    pub event: String,
}
