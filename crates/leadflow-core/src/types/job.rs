//! Background job types.

use super::identifiers::{JobId, PhoneNumber, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two job families the queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Deliver an outbound WhatsApp message through a provider.
    SendMessage,
    /// Reconcile one normalized inbound event into tenant state.
    SyncInbound,
}

impl JobKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SendMessage => "send_message",
            JobKind::SyncInbound => "sync_inbound",
        }
    }

    /// Parse from the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_message" => Some(JobKind::SendMessage),
            "sync_inbound" => Some(JobKind::SyncInbound),
            _ => None,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker; claimable once `next_run_at` has passed.
    Pending,
    /// Claimed by a worker holding a lease.
    Running,
    /// Finished successfully; terminal.
    Succeeded,
    /// Failed terminally for a tenant-visible reason; terminal.
    Failed,
    /// Exhausted retries or hit an unrecoverable system error; terminal,
    /// only a manual requeue brings it back.
    DeadLettered,
}

impl JobStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }

    /// Parse from the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "dead_lettered" => Some(JobStatus::DeadLettered),
            _ => None,
        }
    }

    /// Whether the status admits no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::DeadLettered
        )
    }
}

/// A unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID; the idempotency key for the job's effect.
    pub id: JobId,

    /// Job family.
    pub kind: JobKind,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Kind-specific payload.
    pub payload: serde_json::Value,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Number of times the job has been handed to a worker. Only increases.
    pub attempt: u32,

    /// Attempt ceiling; reaching it dead-letters the job.
    pub max_attempts: u32,

    /// Earliest time the job may next be claimed.
    pub next_run_at: DateTime<Utc>,

    /// Worker currently holding the claim, if any.
    pub claim_owner: Option<String>,

    /// When the current claim lease expires.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Most recent failure, if any.
    pub last_error: Option<String>,
}

/// Payload of a `send_message` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Recipient number.
    pub to_number: PhoneNumber,

    /// Sending number; must belong to the job's tenant.
    pub from_number: PhoneNumber,

    /// Message text.
    pub body: String,
}
