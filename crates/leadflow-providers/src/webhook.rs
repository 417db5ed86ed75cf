//! Webhook payload translation.
//!
//! Turns a provider's native callback payload into normalized
//! [`InboundEvent`]s. 360dialog forwards the Cloud API webhook format
//! unchanged, so both backends share the Meta parser.

use crate::error::ProviderError;
use crate::Result;
use leadflow_core::types::{
    DeliveryReceiptEvent, DeliveryStatus, InboundEvent, InboundMessageEvent, PhoneNumber, TenantId,
};
use serde::Deserialize;
use tracing::warn;

/// WhatsApp Cloud API webhook envelope.
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WhatsAppWebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WhatsAppWebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookChange {
    pub value: WhatsAppWebhookValue,
    pub field: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookValue {
    #[serde(default)]
    pub contacts: Vec<WhatsAppWebhookContact>,
    #[serde(default)]
    pub messages: Vec<WhatsAppWebhookMessage>,
    #[serde(default)]
    pub statuses: Vec<WhatsAppWebhookStatus>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookContact {
    pub profile: WhatsAppProfile,
    pub wa_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WhatsAppTextContent>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppTextContent {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookStatus {
    pub id: String,
    pub status: String,
    pub timestamp: String,
    pub recipient_id: String,
}

/// Map a Cloud API status string onto [`DeliveryStatus`].
fn parse_receipt_status(raw: &str) -> Option<DeliveryStatus> {
    match raw {
        "sent" => Some(DeliveryStatus::Sent),
        "delivered" => Some(DeliveryStatus::Delivered),
        "read" => Some(DeliveryStatus::Read),
        "failed" => Some(DeliveryStatus::Failed),
        _ => None,
    }
}

/// Translate one Cloud API webhook payload into normalized events.
///
/// Unknown message types and status strings are skipped with a warning;
/// a structurally broken payload is an error. The event IDs are chosen so
/// that a redelivered webhook produces the same IDs again: the message ID
/// for inbound messages, `<message id>:<status>` for receipts.
pub fn parse_whatsapp_webhook(
    tenant_id: &TenantId,
    payload: &serde_json::Value,
) -> Result<Vec<InboundEvent>> {
    let envelope: WhatsAppWebhookPayload = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::Payload(e.to_string()))?;

    let mut events = Vec::new();

    for entry in &envelope.entry {
        for change in &entry.changes {
            if change.field != "messages" {
                continue;
            }

            for status in &change.value.statuses {
                let Some(delivery_status) = parse_receipt_status(&status.status) else {
                    warn!(status = %status.status, "Skipping unknown receipt status");
                    continue;
                };

                let event = InboundEvent::delivery_receipt(
                    tenant_id.clone(),
                    format!("{}:{}", status.id, status.status),
                    DeliveryReceiptEvent {
                        provider_message_id: status.id.clone(),
                        status: delivery_status,
                        recipient: Some(PhoneNumber::new(status.recipient_id.clone())),
                    },
                )
                .map_err(|e| ProviderError::Payload(e.to_string()))?;
                events.push(event);
            }

            for message in &change.value.messages {
                if message.message_type != "text" {
                    warn!(
                        message_type = %message.message_type,
                        "Skipping non-text inbound message"
                    );
                    continue;
                }
                let Some(text) = message.text.as_ref() else {
                    continue;
                };

                let profile_name = change
                    .value
                    .contacts
                    .iter()
                    .find(|c| c.wa_id == message.from)
                    .map(|c| c.profile.name.clone());

                let event = InboundEvent::inbound_message(
                    tenant_id.clone(),
                    message.id.clone(),
                    InboundMessageEvent {
                        from_phone: PhoneNumber::new(message.from.clone()),
                        profile_name,
                        text: text.body.clone(),
                        provider_message_id: message.id.clone(),
                        timestamp: message.timestamp.parse::<i64>().ok(),
                    },
                )
                .map_err(|e| ProviderError::Payload(e.to_string()))?;
                events.push(event);
            }
        }
    }

    Ok(events)
}
