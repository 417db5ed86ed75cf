//! Quota enforcement under the warm-up governor, including the racing
//! boundary reservation.

use leadflow_engine::{DenyReason, Reservation};
use leadflow_integration_tests::{MockProvider, TestEngine};

#[tokio::test]
async fn warming_up_cap_denies_the_51st_send() {
    let engine = TestEngine::in_memory(MockProvider::default()).await;

    for i in 0..50 {
        let reservation = engine
            .governor
            .reserve(&engine.tenant, &engine.from)
            .await
            .unwrap();
        assert_eq!(reservation, Reservation::Allowed, "send {i} should pass");
    }

    let denied = engine
        .governor
        .reserve(&engine.tenant, &engine.from)
        .await
        .unwrap();
    assert_eq!(denied, Reservation::Denied(DenyReason::QuotaExhausted));

    let number = engine
        .governor
        .number_status(&engine.tenant)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(number.sent_today, number.daily_limit);
}

#[tokio::test]
async fn concurrent_reservations_at_the_boundary() {
    // A file-backed pool, so the racing reservations really run on
    // separate connections.
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::on_disk(MockProvider::default(), &dir).await;

    // Burn the quota down to one remaining slot
    for _ in 0..49 {
        assert_eq!(
            engine
                .governor
                .reserve(&engine.tenant, &engine.from)
                .await
                .unwrap(),
            Reservation::Allowed
        );
    }

    let a = {
        let governor = engine.governor.clone();
        let tenant = engine.tenant.clone();
        let from = engine.from.clone();
        tokio::spawn(async move { governor.reserve(&tenant, &from).await.unwrap() })
    };
    let b = {
        let governor = engine.governor.clone();
        let tenant = engine.tenant.clone();
        let from = engine.from.clone();
        tokio::spawn(async move { governor.reserve(&tenant, &from).await.unwrap() })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let allowed = outcomes
        .iter()
        .filter(|r| matches!(r, Reservation::Allowed))
        .count();
    let denied = outcomes
        .iter()
        .filter(|r| matches!(r, Reservation::Denied(DenyReason::QuotaExhausted)))
        .count();

    // Exactly one reservation wins the last slot
    assert_eq!(allowed, 1, "outcomes: {outcomes:?}");
    assert_eq!(denied, 1, "outcomes: {outcomes:?}");

    let number = engine
        .governor
        .number_status(&engine.tenant)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(number.sent_today, 50);
    assert!(number.sent_today <= number.daily_limit);
}
