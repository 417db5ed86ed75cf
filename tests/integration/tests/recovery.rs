//! Crash recovery: lost acknowledgments reconcile instead of resending,
//! leases return to the queue, dead-lettered jobs stay dead.

use chrono::{Duration, Utc};
use leadflow_core::types::{DeliveryStatus, JobStatus, MessageId};
use leadflow_integration_tests::{MockProvider, TestEngine};
use leadflow_store::NewOutboundMessage;

/// Claim a job, persist the dispatch marker, and abandon it the way a
/// process dying after the provider call would.
async fn crash_mid_dispatch(engine: &TestEngine, job_id: &leadflow_core::types::JobId) -> MessageId {
    let job = engine.queue.claim_next("crashed-worker").await.unwrap().unwrap();
    assert_eq!(&job.id, job_id);

    let message = engine
        .store
        .create_message_for_job(&NewOutboundMessage {
            id: MessageId::new(),
            tenant_id: engine.tenant.clone(),
            job_id: job.id.clone(),
            from_number: engine.from.clone(),
            to_number: engine.to.clone(),
            body: "hi".to_string(),
        })
        .await
        .unwrap();
    engine
        .store
        .mark_dispatch_started(&engine.tenant, &message.id, job.attempt)
        .await
        .unwrap();

    // The sweeper eventually returns the expired lease to the queue
    engine
        .store
        .release_expired_leases(Utc::now() + Duration::seconds(120))
        .await
        .unwrap();

    message.id
}

#[tokio::test]
async fn lost_ack_reconciles_without_duplicate_send() {
    let provider = MockProvider::default();
    let engine = TestEngine::in_memory(provider).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "hi".to_string(),
        )
        .await
        .unwrap();

    let message_id = crash_mid_dispatch(&engine, &job_id).await;
    // The provider did process the send before the crash
    engine.provider.set_lookup("wamid.recovered", DeliveryStatus::Sent);

    engine.drain().await;

    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    // The recipient got exactly zero additional messages
    assert_eq!(engine.provider.send_count(), 0);

    let message = engine
        .store
        .get_message(&engine.tenant, &message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.delivery_status, DeliveryStatus::Sent);
    assert_eq!(message.provider_message_id.as_deref(), Some("wamid.recovered"));
}

#[tokio::test]
async fn unverifiable_crash_dead_letters_instead_of_resending() {
    let provider = MockProvider {
        lookup_unsupported: true,
        ..Default::default()
    };
    let engine = TestEngine::in_memory(provider).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "hi".to_string(),
        )
        .await
        .unwrap();

    let message_id = crash_mid_dispatch(&engine, &job_id).await;
    engine.drain().await;

    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(engine.provider.send_count(), 0);

    let message = engine
        .store
        .get_message(&engine.tenant, &message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.delivery_status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn dead_lettered_jobs_are_never_reclaimed() {
    let provider = MockProvider::default();
    provider
        .fail_first
        .store(usize::MAX, std::sync::atomic::Ordering::SeqCst);
    let engine = TestEngine::in_memory(provider).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "hi".to_string(),
        )
        .await
        .unwrap();
    engine.drain().await;

    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.attempt, 3);

    // Sweeps and further drains never bring it back
    engine.queue.sweep(Utc::now() + Duration::hours(2)).await.unwrap();
    assert!(engine.queue.claim_next("w-later").await.unwrap().is_none());

    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.attempt, 3);

    // A manual requeue is the only way back
    assert!(engine.queue.requeue_dead_letter(&job_id).await.unwrap());
    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn expired_lease_returns_job_to_the_queue() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    let job_id = engine
        .queue
        .enqueue_send_message(
            engine.tenant.clone(),
            engine.to.clone(),
            engine.from.clone(),
            "hi".to_string(),
        )
        .await
        .unwrap();

    // A worker claims and dies without touching anything
    let claimed = engine.queue.claim_next("doomed").await.unwrap().unwrap();
    assert_eq!(claimed.id, job_id);
    assert!(engine.queue.claim_next("w2").await.unwrap().is_none());

    // After lease expiry the sweep releases it and processing finishes
    engine
        .queue
        .sweep(Utc::now() + Duration::seconds(120))
        .await
        .unwrap();
    engine.drain().await;

    let job = engine.queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 2);
    assert_eq!(engine.provider.send_count(), 1);
}
