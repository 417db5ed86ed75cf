//! End-to-end delivery: enqueue, send through the provider, then apply the
//! delivery receipts that come back through the webhook path.

use leadflow_core::types::{DeliveryStatus, JobStatus};
use leadflow_gateway::signature::{sign_meta_payload, verify_meta_signature};
use leadflow_integration_tests::{MockProvider, TestEngine};
use leadflow_providers::webhook::parse_whatsapp_webhook;
use leadflow_store::ReconcileOutcome;

fn receipt_payload(provider_message_id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "1",
            "changes": [{
                "field": "messages",
                "value": {
                    "statuses": [{
                        "id": provider_message_id,
                        "status": status,
                        "timestamp": "1700000100",
                        "recipient_id": "4917612345678"
                    }]
                }
            }]
        }]
    })
}

#[tokio::test]
async fn delivery_flow_end_to_end() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "Viewing confirmed for Saturday 11:00".to_string(),
        )
        .await
        .unwrap();
    engine.drain().await;

    // The job succeeded and exactly one message left the building
    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(engine.provider.send_count(), 1);

    let message = engine
        .store
        .get_message_by_job(&engine.tenant, &job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.delivery_status, DeliveryStatus::Sent);
    let provider_message_id = message.provider_message_id.clone().unwrap();

    // Delivery receipt arrives through the webhook path, out of order:
    // 'delivered' first, then a delayed 'sent'
    for status in ["delivered", "sent"] {
        let payload = receipt_payload(&provider_message_id, status);
        let events = parse_whatsapp_webhook(&engine.tenant, &payload).unwrap();
        for event in &events {
            engine.queue.enqueue_sync_inbound(event).await.unwrap();
        }
    }
    engine.drain().await;

    // The late 'sent' did not regress the status
    let message = engine
        .store
        .get_message(&engine.tenant, &message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.delivery_status, DeliveryStatus::Delivered);

    // Redelivering the same receipt is a no-op
    let payload = receipt_payload(&provider_message_id, "delivered");
    let events = parse_whatsapp_webhook(&engine.tenant, &payload).unwrap();
    assert_eq!(
        engine.reconciler.apply(&events[0]).await.unwrap(),
        ReconcileOutcome::Duplicate
    );
}

#[tokio::test]
async fn transient_provider_failures_are_retried() {
    let provider = MockProvider::default();
    provider
        .fail_first
        .store(2, std::sync::atomic::Ordering::SeqCst);
    let engine = TestEngine::in_memory(provider).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "hello".to_string(),
        )
        .await
        .unwrap();
    engine.drain().await;

    // Two transient failures, then success on the third attempt
    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 3);
    assert_eq!(engine.provider.send_count(), 1);
}

#[tokio::test]
async fn webhook_signature_gate() {
    // The gateway only accepts payloads signed with the tenant's secret
    let body = serde_json::to_vec(&receipt_payload("wamid.x", "delivered")).unwrap();
    let header = sign_meta_payload("app-secret", &body);

    assert!(verify_meta_signature("app-secret", &body, &header));
    assert!(!verify_meta_signature("another-secret", &body, &header));

    let mut tampered = body.clone();
    tampered.push(b' ');
    assert!(!verify_meta_signature("app-secret", &tampered, &header));
}
