//! Webhook reconciler.
//!
//! Applies normalized inbound events to tenant state exactly once. The
//! store performs each apply inside a single transaction with the seen-set
//! insert; this layer parses the payload and dispatches by kind.

use crate::error::Result;
use leadflow_core::types::{
    CrmLeadEventPayload, DeliveryReceiptEvent, InboundEvent, InboundEventKind, InboundMessageEvent,
};
use leadflow_store::{ReconcileOutcome, Store};
use tracing::debug;

/// Applies inbound events idempotently.
pub struct Reconciler {
    store: Store,
}

impl Reconciler {
    /// Create a reconciler over the given store.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Apply one event. Re-applying an already-seen `provider_event_id`
    /// returns [`ReconcileOutcome::Duplicate`] and mutates nothing.
    pub async fn apply(&self, event: &InboundEvent) -> Result<ReconcileOutcome> {
        let outcome = match event.kind {
            InboundEventKind::DeliveryReceipt => {
                let receipt: DeliveryReceiptEvent =
                    serde_json::from_value(event.payload.clone())?;
                self.store.apply_delivery_receipt(event, &receipt).await?
            }
            InboundEventKind::InboundMessage => {
                let message: InboundMessageEvent =
                    serde_json::from_value(event.payload.clone())?;
                let (outcome, _lead) = self.store.apply_inbound_message(event, &message).await?;
                outcome
            }
            InboundEventKind::CrmLeadEvent => {
                let crm: CrmLeadEventPayload = serde_json::from_value(event.payload.clone())?;
                let (outcome, _lead) = self.store.apply_crm_lead_event(event, &crm).await?;
                outcome
            }
        };

        if outcome == ReconcileOutcome::Duplicate {
            debug!(
                tenant = %event.tenant_id,
                event_id = %event.provider_event_id,
                "Duplicate inbound event ignored"
            );
        }
        Ok(outcome)
    }
}
