//! Outbound message storage.
//!
//! Provider sends are side-effecting and non-idempotent, so this module
//! persists a dispatch marker before any provider call and only ever
//! advances `delivery_status` along its rank order. A marker with no
//! provider message ID is the signature of a lost acknowledgment.

use crate::{from_millis, to_millis, Result, Store, StoreError};
use chrono::Utc;
use leadflow_core::types::{
    DeliveryStatus, JobId, MessageId, OutboundMessage, PhoneNumber, TenantId,
};
use tracing::debug;

/// An outbound message to create for a freshly accepted send job.
#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub from_number: PhoneNumber,
    pub to_number: PhoneNumber,
    pub body: String,
}

type MessageRow = (
    String,         // id
    String,         // tenant_id
    String,         // job_id
    String,         // from_number
    String,         // to_number
    String,         // body
    Option<String>, // provider_message_id
    String,         // delivery_status
    Option<i64>,    // dispatch_attempt
    i64,            // needs_reconciliation
    Option<String>, // failure_reason
    i64,            // created_at
    i64,            // updated_at
);

const MESSAGE_COLUMNS: &str = "id, tenant_id, job_id, from_number, to_number, body, \
     provider_message_id, delivery_status, dispatch_attempt, needs_reconciliation, \
     failure_reason, created_at, updated_at";

fn message_from_row(row: MessageRow) -> Result<OutboundMessage> {
    let (
        id,
        tenant_id,
        job_id,
        from_number,
        to_number,
        body,
        provider_message_id,
        delivery_status,
        dispatch_attempt,
        needs_reconciliation,
        failure_reason,
        created_at,
        updated_at,
    ) = row;

    let delivery_status = DeliveryStatus::parse(&delivery_status).ok_or_else(|| {
        StoreError::corrupted(
            "outbound_messages",
            format!("unknown delivery status '{delivery_status}'"),
        )
    })?;

    Ok(OutboundMessage {
        id: MessageId::from_string(id),
        tenant_id: TenantId::new(tenant_id),
        job_id: JobId::from_string(job_id),
        from_number: PhoneNumber::new(from_number),
        to_number: PhoneNumber::new(to_number),
        body,
        provider_message_id,
        delivery_status,
        dispatch_attempt: dispatch_attempt.map(|a| a as u32),
        needs_reconciliation: needs_reconciliation != 0,
        failure_reason,
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
    })
}

impl Store {
    /// Create the outbound message for a send job, or return the existing
    /// one on a retried attempt. Keyed by `job_id`, so a job never owns two
    /// messages.
    pub async fn create_message_for_job(
        &self,
        message: &NewOutboundMessage,
    ) -> Result<OutboundMessage> {
        let now = to_millis(Utc::now());
        sqlx::query(
            "INSERT INTO outbound_messages \
             (id, tenant_id, job_id, from_number, to_number, body, delivery_status, \
              delivery_rank, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?7) \
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(message.id.as_str())
        .bind(message.tenant_id.as_str())
        .bind(message.job_id.as_str())
        .bind(message.from_number.as_str())
        .bind(message.to_number.as_str())
        .bind(&message.body)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_message_by_job(&message.tenant_id, &message.job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message for job {}", message.job_id)))
    }

    /// Fetch the message owned by a job.
    pub async fn get_message_by_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<Option<OutboundMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbound_messages \
             WHERE tenant_id = ?1 AND job_id = ?2"
        ))
        .bind(tenant_id.as_str())
        .bind(job_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(message_from_row).transpose()
    }

    /// Fetch one message by ID.
    pub async fn get_message(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
    ) -> Result<Option<OutboundMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbound_messages WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(message_from_row).transpose()
    }

    /// Record which job attempt is about to reach the provider. Persisted
    /// BEFORE the provider call so a crash afterwards leaves evidence.
    pub async fn mark_dispatch_started(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
        attempt: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET dispatch_attempt = ?1, updated_at = ?2 \
             WHERE tenant_id = ?3 AND id = ?4",
        )
        .bind(attempt as i64)
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist the provider acknowledgment and move the message to `sent`.
    pub async fn record_provider_ack(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
        provider_message_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET provider_message_id = ?1, delivery_status = 'sent', \
             delivery_rank = ?2, needs_reconciliation = 0, updated_at = ?3 \
             WHERE tenant_id = ?4 AND id = ?5",
        )
        .bind(provider_message_id)
        .bind(DeliveryStatus::Sent.rank())
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;

        debug!(message_id = %message_id, provider_message_id, "Provider acknowledgment recorded");
        Ok(())
    }

    /// Clear the dispatch marker after the provider definitively rejected
    /// the send: no message left this process, so a later attempt may send
    /// fresh.
    pub async fn clear_dispatch_marker(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET dispatch_attempt = NULL, updated_at = ?1 \
             WHERE tenant_id = ?2 AND id = ?3 AND provider_message_id IS NULL",
        )
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flag a message whose provider-side state must be looked up before
    /// anything else happens to it.
    pub async fn flag_message_reconciliation(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET needs_reconciliation = 1, updated_at = ?1 \
             WHERE tenant_id = ?2 AND id = ?3",
        )
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Resolve a flagged message with the truth obtained from the provider.
    pub async fn resolve_reconciled_message(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
        provider_message_id: Option<&str>,
        status: DeliveryStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET \
             provider_message_id = COALESCE(?1, provider_message_id), \
             delivery_status = ?2, delivery_rank = ?3, needs_reconciliation = 0, \
             updated_at = ?4 \
             WHERE tenant_id = ?5 AND id = ?6",
        )
        .bind(provider_message_id)
        .bind(status.as_str())
        .bind(status.rank())
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Terminally fail a message with a tenant-visible reason.
    pub async fn mark_message_failed(
        &self,
        tenant_id: &TenantId,
        message_id: &MessageId,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET delivery_status = 'failed', delivery_rank = ?1, \
             needs_reconciliation = 0, failure_reason = ?2, updated_at = ?3 \
             WHERE tenant_id = ?4 AND id = ?5",
        )
        .bind(DeliveryStatus::Failed.rank())
        .bind(reason)
        .bind(to_millis(Utc::now()))
        .bind(tenant_id.as_str())
        .bind(message_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
