//! Integration test: guarantee settlement across engine, dispatcher and ledger.
//!
//! Every scenario runs against the in-memory reference ledger and checks the
//! engine's mirror against committed ledger state.

use futures::future::join_all;
use slabond_core::{AlertReason, Clock, Denomination, GuaranteeStatus, SlaStatus};
use slabond_engine::{EngineError, ErrorKind};
use slabond_integration_tests::{admin, customer, request, Stack, HOUR, T0};
use slabond_ledger::{EventFilter, EventTopic, LedgerClient, LedgerEventKind, ReleaseReason};

// =========================================================================
// Happy path and breach path
// =========================================================================

#[tokio::test]
async fn test_on_time_delivery_refunds_escrow() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("parcel-a", T0 + 48 * HOUR))
        .await
        .expect("create");
    assert_eq!(stack.engine.get(&id).unwrap().status, GuaranteeStatus::Active);
    assert_eq!(stack.ledger.vault_balance(&Denomination::Native), 15);

    let status = stack
        .engine
        .record_completion(&id, T0 + 47 * HOUR, true)
        .await
        .expect("complete");
    assert_eq!(status, GuaranteeStatus::Fulfilled);
    assert_eq!(stack.customer_balance(), 15);
    assert_eq!(stack.ledger.vault_balance(&Denomination::Native), 0);
    assert_eq!(stack.engine.stats().on_time, 1);

    // Committed state agrees with the mirror.
    let committed = stack.ledger.read_state(&id).await.unwrap().unwrap();
    assert_eq!(committed.status, GuaranteeStatus::Fulfilled);
    assert_eq!(committed.completed_at, Some(T0 + 47 * HOUR));
    assert!(!committed.penalty_paid);

    // Repeating is an error and pays nothing.
    let err = stack
        .engine
        .record_completion(&id, T0 + 47 * HOUR, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(stack.ledger.total_released(), 15);
    assert_eq!(stack.engine.stats().on_time, 1);
}

#[tokio::test]
async fn test_missed_deadline_alerts_once_then_pays_penalty() {
    let mut stack = Stack::new();
    let id = stack
        .engine
        .create(request("parcel-b", T0 + HOUR))
        .await
        .unwrap();

    stack.clock.advance(HOUR + 60);
    let report = stack.monitor.evaluate_all().await;
    assert_eq!(report.alerts_raised, 1);
    assert_eq!(stack.engine.get(&id).unwrap().sla_status, SlaStatus::Delayed);

    // Re-evaluating without change is silent.
    for _ in 0..3 {
        assert_eq!(stack.monitor.evaluate_all().await.alerts_raised, 0);
    }
    let alerts = stack.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].reason, AlertReason::SlaDelayed);

    let status = stack
        .engine
        .record_completion(&id, stack.clock.now(), false)
        .await
        .unwrap();
    assert_eq!(status, GuaranteeStatus::Breached);

    let stats = stack.engine.stats();
    assert_eq!(stats.penalties_paid, 1);
    assert_eq!(stats.total_penalty_amount, 15);
    let release = stack.ledger.release_of(&id).unwrap();
    assert_eq!(release.reason, ReleaseReason::Penalty);
    assert_eq!(release.recipient, customer());
    assert_eq!(release.amount, 15);

    assert!(stack
        .engine
        .record_completion(&id, stack.clock.now(), false)
        .await
        .is_err());
    assert_eq!(stack.engine.stats().penalties_paid, 1);
}

#[tokio::test]
async fn test_deadline_boundary() {
    let stack = Stack::new();
    let exact = stack.engine.create(request("exact", T0 + HOUR)).await.unwrap();
    let late = stack.engine.create(request("late", T0 + HOUR)).await.unwrap();

    assert_eq!(
        stack.engine.record_delivery(&exact, T0 + HOUR).await.unwrap(),
        GuaranteeStatus::Fulfilled
    );
    assert_eq!(
        stack.engine.record_delivery(&late, T0 + HOUR + 1).await.unwrap(),
        GuaranteeStatus::Breached
    );
}

#[tokio::test]
async fn test_dispute_after_breach() {
    let mut stack = Stack::new();
    let id = stack.engine.create(request("parcel-c", T0 + HOUR)).await.unwrap();
    stack
        .engine
        .record_completion(&id, T0 + 2 * HOUR, false)
        .await
        .unwrap();

    assert_eq!(
        stack.engine.dispute(&id, &admin(), "scan shows delivery").await.unwrap(),
        GuaranteeStatus::Disputed
    );
    let committed = stack.ledger.read_state(&id).await.unwrap().unwrap();
    assert_eq!(committed.status, GuaranteeStatus::Disputed);
    assert!(committed.penalty_paid);

    let alerts = stack.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(alerts[0].reason, AlertReason::Disputed(_)));
    assert_eq!(stack.ledger.total_released(), 15);
}

// =========================================================================
// Concurrency and conservation
// =========================================================================

#[tokio::test]
async fn test_concurrent_completions_single_release() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("contested", T0 + 48 * HOUR))
        .await
        .unwrap();

    let engine = &stack.engine;
    let calls = (0..8).map(|i| async move {
        engine
            .record_completion(&id, T0 + HOUR, i % 2 == 0)
            .await
    });
    let results = join_all(calls).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
    }
    assert_eq!(stack.ledger.total_released(), 15);
    assert_eq!(stack.engine.escrow_book().total_released(), 15);
}

#[tokio::test]
async fn test_escrow_conservation_across_guarantees() {
    let stack = Stack::new();
    let mut ids = Vec::new();
    for i in 0..12 {
        let id = stack
            .engine
            .create(request(&format!("item-{}", i), T0 + 10 * HOUR))
            .await
            .unwrap();
        ids.push(id);
    }

    let engine = &stack.engine;
    let outcomes = ids.iter().enumerate().map(|(i, id)| async move {
        match i % 3 {
            0 => engine.record_completion(id, T0 + HOUR, true).await,
            1 => engine.record_completion(id, T0 + 11 * HOUR, false).await,
            _ => engine.cancel(id, &customer()).await,
        }
    });
    for result in join_all(outcomes).await {
        result.unwrap();
    }

    // Retries and duplicates change nothing.
    for id in &ids {
        assert!(stack.engine.record_completion(id, T0 + HOUR, true).await.is_err());
        assert!(stack.engine.cancel(id, &customer()).await.is_err());
    }

    let book = stack.engine.escrow_book();
    assert_eq!(book.total_locked(), 12 * 15);
    assert_eq!(book.total_released(), book.total_locked());
    assert_eq!(stack.ledger.total_released(), 12 * 15);
    assert_eq!(stack.ledger.vault_balance(&Denomination::Native), 0);
    assert_eq!(stack.customer_balance(), 12 * 15);

    let stats = stack.engine.stats();
    assert_eq!(stats.on_time, 4);
    assert_eq!(stats.penalties_paid, 4);
    assert_eq!(stats.cancelled, 4);
    assert!(stack.engine.active_ids().is_empty());
}

#[tokio::test]
async fn test_ledger_events_follow_lifecycle() {
    let stack = Stack::new();
    let mut events = stack.ledger.subscribe(EventFilter::all());
    let id = stack.engine.create(request("evented", T0 + 48 * HOUR)).await.unwrap();
    let mut releases = stack
        .ledger
        .subscribe(EventFilter::for_guarantee(id).with_topic(EventTopic::EscrowRelease));
    stack.engine.cancel(&id, &customer()).await.unwrap();

    let created = events.next().await.unwrap();
    assert!(matches!(created.kind, LedgerEventKind::GuaranteeCreated { .. }));

    let release = releases.next().await.unwrap();
    match release.kind {
        LedgerEventKind::EscrowReleased { amount, reason, .. } => {
            assert_eq!(amount, 15);
            assert_eq!(reason, ReleaseReason::Cancelled);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
