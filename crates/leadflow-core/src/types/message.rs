//! Outbound message types.

use super::identifiers::{JobId, MessageId, PhoneNumber, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of an outbound message as reported by the provider.
///
/// Receipts may arrive out of order; state only ever advances along
/// `Queued -> Sent -> Delivered -> Read`, with `Failed` reachable from
/// `Queued`/`Sent` only. [`DeliveryStatus::rank`] encodes that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Stable string form used in storage and webhook payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Parse from the storage/webhook string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryStatus::Queued),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    /// Monotonic rank; receipt application only moves rank upward.
    pub fn rank(&self) -> i64 {
        match self {
            DeliveryStatus::Queued => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            DeliveryStatus::Failed => 4,
        }
    }

    /// Whether no further receipt can change this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Read | DeliveryStatus::Failed
        )
    }
}

/// An outbound WhatsApp message owned by a `send_message` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,

    /// The job that owns this message; exactly one message per job.
    pub job_id: JobId,

    pub from_number: PhoneNumber,
    pub to_number: PhoneNumber,
    pub body: String,

    /// Provider-assigned ID, populated once the provider acknowledges.
    pub provider_message_id: Option<String>,

    pub delivery_status: DeliveryStatus,

    /// The job attempt that reached the provider, persisted before the
    /// provider call. A set marker with no `provider_message_id` means the
    /// acknowledgment was lost and the send must be reconciled, not retried.
    pub dispatch_attempt: Option<u32>,

    /// Set when the true provider-side state must be looked up before any
    /// further action on this message.
    pub needs_reconciliation: bool,

    /// Tenant-visible failure reason for terminal failures.
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(DeliveryStatus::Queued.rank() < DeliveryStatus::Sent.rank());
        assert!(DeliveryStatus::Sent.rank() < DeliveryStatus::Delivered.rank());
        assert!(DeliveryStatus::Delivered.rank() < DeliveryStatus::Read.rank());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DeliveryStatus::Queued,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
    }
}
