//! Integration test: settlement under ledger faults.
//!
//! Ambiguous timeouts, transient failures, exhausted retries, pooled
//! inclusion and sequence contention between two engines sharing a sender.

use std::sync::Arc;

use slabond_core::{Denomination, EngineConfig, GuaranteeStatus};
use slabond_engine::{ChannelAlertSink, EngineError, ErrorKind, GuaranteeEngine};
use slabond_integration_tests::{customer, request, Stack, HOUR, T0};
use slabond_ledger::{
    Dispatcher, LedgerClient, LedgerError, LedgerFault, RetryPolicy, TxStatus,
};
use tokio::time::{Duration, Instant};

fn timeout() -> LedgerFault {
    LedgerFault::Fail(LedgerError::Timeout("gateway timed out".into()))
}

#[tokio::test(start_paused = true)]
async fn test_ambiguous_release_is_never_paid_twice() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("ambiguous", T0 + 48 * HOUR))
        .await
        .unwrap();

    // The release lands but its response is lost; the retry hits the guard.
    stack.ledger.inject_fault(LedgerFault::LandThenTimeout);
    let err = stack
        .engine
        .record_completion(&id, T0 + HOUR, true)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyReleased(id));
    assert_eq!(err.kind(), ErrorKind::AlreadyReleased);

    // The mirror caught up with the ledger.
    let g = stack.engine.get(&id).unwrap();
    assert_eq!(g.status, GuaranteeStatus::Fulfilled);
    assert_eq!(g.completed_at, Some(T0 + HOUR));
    assert!(stack.engine.escrow(&id).unwrap().released);

    assert_eq!(stack.ledger.total_released(), 15);
    assert_eq!(stack.customer_balance(), 15);
    assert_eq!(stack.engine.stats().on_time, 1);

    let again = stack
        .engine
        .record_completion(&id, T0 + HOUR, true)
        .await
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::InvalidState);
    assert_eq!(stack.ledger.total_released(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_on_schedule() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("flaky", T0 + 48 * HOUR))
        .await
        .unwrap();
    let before = stack.ledger.submission_count();

    stack.ledger.inject_fault(timeout());
    stack.ledger.inject_fault(timeout());

    let started = Instant::now();
    let status = stack
        .engine
        .record_completion(&id, T0 + HOUR, true)
        .await
        .unwrap();
    assert_eq!(status, GuaranteeStatus::Fulfilled);

    // Two failures, then success on the third attempt after 200ms + 400ms.
    assert_eq!(stack.ledger.submission_count() - before, 3);
    assert_eq!(started.elapsed(), Duration::from_millis(600));
    assert!(stack.dispatcher.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_last_cause() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("down", T0 + 48 * HOUR))
        .await
        .unwrap();

    for _ in 0..4 {
        stack.ledger.inject_fault(timeout());
    }
    let err = stack
        .engine
        .record_completion(&id, T0 + HOUR, true)
        .await
        .unwrap_err();
    match &err {
        EngineError::SubmissionFailed {
            id: failed,
            attempts,
            last_cause,
        } => {
            assert_eq!(*failed, id);
            assert_eq!(*attempts, 4);
            assert!(matches!(last_cause, LedgerError::Timeout(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.subject(), Some(id.to_hex()));

    // Nothing moved anywhere.
    assert_eq!(stack.engine.get(&id).unwrap().status, GuaranteeStatus::Active);
    let committed = stack.ledger.read_state(&id).await.unwrap().unwrap();
    assert_eq!(committed.status, GuaranteeStatus::Active);
    assert_eq!(stack.ledger.vault_balance(&Denomination::Native), 15);
}

#[tokio::test(start_paused = true)]
async fn test_pooled_submission_confirms_after_mining() {
    let stack = Stack::new();
    stack.ledger.set_auto_mine(false);

    let id = stack
        .engine
        .create(request("pooled", T0 + 48 * HOUR))
        .await
        .unwrap();
    assert!(stack.ledger.read_state(&id).await.unwrap().is_none());

    let head = stack.ledger.mine();
    assert_eq!(head.height, 1);
    let committed = stack.ledger.read_state(&id).await.unwrap().unwrap();
    assert_eq!(committed.status, GuaranteeStatus::Active);
    assert_eq!(committed.escrow_amount, 15);
}

#[tokio::test(start_paused = true)]
async fn test_await_confirmation_of_pooled_alert() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("watched", T0 + 48 * HOUR))
        .await
        .unwrap();
    stack.ledger.set_auto_mine(false);

    let operator = stack.engine.config().operator;
    let alert = slabond_core::Alert {
        guarantee_id: id,
        reason: slabond_core::AlertReason::SlaAtRisk,
        timestamp: T0,
        notified_contacts: vec![customer()],
    };
    let receipt = stack
        .dispatcher
        .submit(&operator, slabond_ledger::TxPayload::Alert(alert))
        .await
        .unwrap();
    assert_eq!(
        stack.ledger.tx_status(&receipt.tx_ref).await.unwrap(),
        TxStatus::Pending
    );

    let ledger = stack.ledger.clone();
    let miner = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        ledger.mine();
    });
    let height = stack
        .dispatcher
        .await_confirmation(&receipt.tx_ref, Duration::from_secs(30))
        .await
        .unwrap();
    miner.await.unwrap();
    assert_eq!(height, 2);
}

#[tokio::test(start_paused = true)]
async fn test_two_engines_share_one_sender() {
    let stack = Stack::new();
    let (sink, _alerts) = ChannelAlertSink::new();
    let other = GuaranteeEngine::new(
        EngineConfig::default(),
        stack.clock.clone(),
        Arc::new(Dispatcher::new(stack.ledger.clone(), RetryPolicy::default())),
        Arc::new(sink),
    );
    assert_eq!(other.config().operator, stack.engine.config().operator);

    let mut first = Vec::new();
    let mut second = Vec::new();
    for i in 0..4 {
        first.push(request(&format!("a-{}", i), T0 + 48 * HOUR));
        second.push(request(&format!("b-{}", i), T0 + 48 * HOUR));
    }

    let engine = stack.engine.clone();
    let a = tokio::spawn(async move {
        for req in first {
            engine.create(req).await.unwrap();
        }
    });
    let other = Arc::new(other);
    let b = {
        let other = other.clone();
        tokio::spawn(async move {
            for req in second {
                other.create(req).await.unwrap();
            }
        })
    };
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(stack.engine.len() + other.len(), 8);
    assert_eq!(stack.ledger.vault_balance(&Denomination::Native), 8 * 15);
    let operator = stack.engine.config().operator;
    assert_eq!(stack.ledger.confirmed_count(&operator).await.unwrap(), 8);
}
