//! Lead and conversation types.

use super::identifiers::{LeadId, PhoneNumber, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lead, identified within a tenant by phone number.
///
/// The reconciler upserts against `(tenant_id, phone)` and never creates
/// two leads for the same phone within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub tenant_id: TenantId,
    pub phone: PhoneNumber,
    pub name: Option<String>,

    /// Where the lead came from (`whatsapp`, `crm`, ...).
    pub source: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

/// One entry in a lead's conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub tenant_id: TenantId,
    pub lead_id: LeadId,
    pub direction: MessageDirection,
    pub body: String,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
