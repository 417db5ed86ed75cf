//! Inbound reconciliation: webhook retries never duplicate leads, CRM
//! events map onto existing leads atomically.

use leadflow_core::types::{CrmLeadEventPayload, InboundEvent, InboundMessageEvent, PhoneNumber};
use leadflow_integration_tests::{MockProvider, TestEngine};
use leadflow_store::ReconcileOutcome;

fn inbound_event(engine: &TestEngine, event_id: &str, phone: &str, text: &str) -> InboundEvent {
    InboundEvent::inbound_message(
        engine.tenant.clone(),
        event_id,
        InboundMessageEvent {
            from_phone: PhoneNumber::new(phone),
            profile_name: Some("Ada".to_string()),
            text: text.to_string(),
            provider_message_id: event_id.to_string(),
            timestamp: Some(1_700_000_000),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn duplicated_webhook_creates_exactly_one_lead() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    // The provider retries the webhook: the same event is enqueued twice
    let event = inbound_event(&engine, "wamid.first-contact", "4917655554444", "Hi there");
    engine.queue.enqueue_sync_inbound(&event).await.unwrap();
    engine.queue.enqueue_sync_inbound(&event).await.unwrap();
    engine.drain().await;

    assert_eq!(engine.store.lead_count(&engine.tenant).await.unwrap(), 1);

    let lead = engine
        .store
        .get_lead_by_phone(&engine.tenant, &PhoneNumber::new("4917655554444"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.name.as_deref(), Some("Ada"));
    assert_eq!(lead.source, "whatsapp");

    // And the conversation log carries the message once
    let log = engine
        .store
        .conversation_for_lead(&engine.tenant, &lead.id)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_application_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::on_disk(MockProvider::default(), &dir).await;

    let event = inbound_event(&engine, "wamid.race", "4917600001111", "Hello?");

    let a = {
        let reconciler = engine.reconciler.clone();
        let event = event.clone();
        tokio::spawn(async move { reconciler.apply(&event).await.unwrap() })
    };
    let b = {
        let reconciler = engine.reconciler.clone();
        let event = event.clone();
        tokio::spawn(async move { reconciler.apply(&event).await.unwrap() })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| **o == ReconcileOutcome::Applied)
        .count();
    assert_eq!(applied, 1, "outcomes: {outcomes:?}");
    assert_eq!(engine.store.lead_count(&engine.tenant).await.unwrap(), 1);
}

#[tokio::test]
async fn crm_events_map_onto_existing_leads() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    // A WhatsApp conversation created the lead first
    let event = inbound_event(&engine, "wamid.wa-first", "4917699887766", "Hi");
    engine.queue.enqueue_sync_inbound(&event).await.unwrap();
    engine.drain().await;

    // Then Bitrix pushes the same person as a lead event, twice
    let crm = CrmLeadEventPayload {
        crm_id: "4711".to_string(),
        phone: Some(PhoneNumber::new("4917699887766")),
        name: Some("Ada Lovelace".to_string()),
        event: "ONCRMLEADADD".to_string(),
    };
    let crm_event = InboundEvent::crm_lead_event(
        engine.tenant.clone(),
        "bitrix:ONCRMLEADADD:4711:1700000001",
        crm,
    )
    .unwrap();
    engine.queue.enqueue_sync_inbound(&crm_event).await.unwrap();
    engine.queue.enqueue_sync_inbound(&crm_event).await.unwrap();
    engine.drain().await;

    // Still one lead; the CRM ID now maps onto it and the name was enriched
    assert_eq!(engine.store.lead_count(&engine.tenant).await.unwrap(), 1);

    let lead = engine
        .store
        .get_lead_by_phone(&engine.tenant, &PhoneNumber::new("4917699887766"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        engine.store.crm_link(&engine.tenant, "4711").await.unwrap(),
        Some(lead.id.clone())
    );
    assert_eq!(lead.name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn tenant_state_is_isolated() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    let event = inbound_event(&engine, "wamid.mine", "4917612121212", "Hi");
    engine.queue.enqueue_sync_inbound(&event).await.unwrap();
    engine.drain().await;

    // Another tenant sees nothing
    let other = leadflow_core::types::TenantId::new("rival-agency");
    assert_eq!(engine.store.lead_count(&other).await.unwrap(), 0);
    assert!(engine
        .store
        .get_lead_by_phone(&other, &PhoneNumber::new("4917612121212"))
        .await
        .unwrap()
        .is_none());
}
