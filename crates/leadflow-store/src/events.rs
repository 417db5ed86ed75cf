//! Inbound-event seen-set and receipt application.
//!
//! The seen-set insert and the event's mutation share one transaction, so
//! a webhook redelivered at any point either applies fully once or reports
//! `Duplicate` with no state change.

use crate::{to_millis, ReconcileOutcome, Result, Store};
use chrono::Utc;
use leadflow_core::types::{DeliveryReceiptEvent, DeliveryStatus, InboundEvent, TenantId};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

/// Insert the event into the seen-set; `false` means it was already there.
///
/// This is the first write of every apply transaction, which also makes it
/// the point where SQLite serializes concurrent appliers.
pub(crate) async fn insert_seen(
    tx: &mut Transaction<'_, Sqlite>,
    event: &InboundEvent,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO inbound_events (tenant_id, provider_event_id, kind, payload, received_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(tenant_id, provider_event_id) DO NOTHING",
    )
    .bind(event.tenant_id.as_str())
    .bind(&event.provider_event_id)
    .bind(event.kind.as_str())
    .bind(serde_json::to_string(&event.payload)?)
    .bind(to_millis(event.received_at))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Store {
    /// Apply a delivery receipt: advance the matching message's status,
    /// monotonically. A receipt that would move the status backwards (or a
    /// `failed` receipt for an already-delivered message) changes nothing.
    pub async fn apply_delivery_receipt(
        &self,
        event: &InboundEvent,
        receipt: &DeliveryReceiptEvent,
    ) -> Result<ReconcileOutcome> {
        let mut tx = self.pool().begin().await?;

        if !insert_seen(&mut tx, event).await? {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let status = receipt.status;
        sqlx::query(
            "UPDATE outbound_messages SET delivery_status = ?1, delivery_rank = ?2, \
             updated_at = ?3 \
             WHERE tenant_id = ?4 AND provider_message_id = ?5 \
               AND delivery_rank < ?2 \
               AND (?1 != 'failed' OR delivery_rank < 2)",
        )
        .bind(status.as_str())
        .bind(status.rank())
        .bind(to_millis(Utc::now()))
        .bind(event.tenant_id.as_str())
        .bind(&receipt.provider_message_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            tenant = %event.tenant_id,
            provider_message_id = %receipt.provider_message_id,
            status = status.as_str(),
            "Delivery receipt applied"
        );
        Ok(ReconcileOutcome::Applied)
    }

    /// Whether an event ID has been applied already (observability/tests).
    pub async fn event_seen(
        &self,
        tenant_id: &TenantId,
        provider_event_id: &str,
    ) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM inbound_events WHERE tenant_id = ?1 AND provider_event_id = ?2",
        )
        .bind(tenant_id.as_str())
        .bind(provider_event_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewOutboundMessage;
    use leadflow_core::types::{JobId, MessageId, PhoneNumber};

    async fn setup_message() -> (Store, TenantId, MessageId) {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant = TenantId::new("acme");
        let msg = store
            .create_message_for_job(&NewOutboundMessage {
                id: MessageId::new(),
                tenant_id: tenant.clone(),
                job_id: JobId::new(),
                from_number: PhoneNumber::new("4915112345678"),
                to_number: PhoneNumber::new("4917612345678"),
                body: "hello".to_string(),
            })
            .await
            .unwrap();
        store
            .record_provider_ack(&tenant, &msg.id, "wamid.1")
            .await
            .unwrap();
        (store, tenant, msg.id)
    }

    fn receipt(status: DeliveryStatus) -> DeliveryReceiptEvent {
        DeliveryReceiptEvent {
            provider_message_id: "wamid.1".to_string(),
            status,
            recipient: None,
        }
    }

    fn receipt_event(
        tenant: &TenantId,
        event_id: &str,
        status: DeliveryStatus,
    ) -> InboundEvent {
        InboundEvent::delivery_receipt(tenant.clone(), event_id, receipt(status)).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_event_applies_once() {
        let (store, tenant, msg_id) = setup_message().await;

        let event = receipt_event(&tenant, "wamid.1:delivered", DeliveryStatus::Delivered);
        let first = store
            .apply_delivery_receipt(&event, &receipt(DeliveryStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(first, ReconcileOutcome::Applied);

        let second = store
            .apply_delivery_receipt(&event, &receipt(DeliveryStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(second, ReconcileOutcome::Duplicate);

        let stored = store.get_message(&tenant, &msg_id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_out_of_order_receipt_never_regresses() {
        let (store, tenant, msg_id) = setup_message().await;

        store
            .apply_delivery_receipt(
                &receipt_event(&tenant, "wamid.1:delivered", DeliveryStatus::Delivered),
                &receipt(DeliveryStatus::Delivered),
            )
            .await
            .unwrap();

        // A delayed 'sent' receipt arrives after 'delivered'
        store
            .apply_delivery_receipt(
                &receipt_event(&tenant, "wamid.1:sent", DeliveryStatus::Sent),
                &receipt(DeliveryStatus::Sent),
            )
            .await
            .unwrap();

        let stored = store.get_message(&tenant, &msg_id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failed_receipt_does_not_override_delivered() {
        let (store, tenant, msg_id) = setup_message().await;

        store
            .apply_delivery_receipt(
                &receipt_event(&tenant, "wamid.1:delivered", DeliveryStatus::Delivered),
                &receipt(DeliveryStatus::Delivered),
            )
            .await
            .unwrap();
        store
            .apply_delivery_receipt(
                &receipt_event(&tenant, "wamid.1:failed", DeliveryStatus::Failed),
                &receipt(DeliveryStatus::Failed),
            )
            .await
            .unwrap();

        let stored = store.get_message(&tenant, &msg_id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failed_receipt_applies_from_sent() {
        let (store, tenant, msg_id) = setup_message().await;

        store
            .apply_delivery_receipt(
                &receipt_event(&tenant, "wamid.1:failed", DeliveryStatus::Failed),
                &receipt(DeliveryStatus::Failed),
            )
            .await
            .unwrap();

        let stored = store.get_message(&tenant, &msg_id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_receipt_is_tenant_scoped() {
        let (store, _tenant, msg_id) = setup_message().await;

        // Same provider message ID, different tenant: no cross-tenant write
        let rival = TenantId::new("rival");
        store
            .apply_delivery_receipt(
                &receipt_event(&rival, "wamid.1:delivered", DeliveryStatus::Delivered),
                &receipt(DeliveryStatus::Delivered),
            )
            .await
            .unwrap();

        let acme = TenantId::new("acme");
        let stored = store.get_message(&acme, &msg_id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
    }
}
