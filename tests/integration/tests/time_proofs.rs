//! Integration test: time-proofs anchored in ledger history.
//!
//! Generation rules (authority, nonce, skew, certificates), verification,
//! proof-gated completion and the audit trail of stamped transitions.

use slabond_core::{Digest, GuaranteeStatus, ItemId};
use slabond_engine::{EngineError, ErrorKind};
use slabond_integration_tests::{customer, request, Stack, HOUR, T0};
use slabond_timeproof::{EventKind, ProofNonce, ProofRequest, TimeProofError};

fn delivery(stack: &Stack, item: &str, attested: i64, nonce: u64) -> ProofRequest {
    ProofRequest {
        subject_id: ItemId::new(item),
        event_kind: EventKind::DeliveryConfirmation,
        requester: stack.courier,
        attested_time: attested,
        certificate_chain: vec![b"courier-leaf".to_vec(), b"courier-root".to_vec()],
        nonce: ProofNonce::from(nonce),
    }
}

// =========================================================================
// Generation rules
// =========================================================================

#[tokio::test]
async fn test_nonce_replay_rejected() {
    let stack = Stack::new();
    let first = stack.registry.generate(delivery(&stack, "p", T0, 42));
    assert!(first.is_ok());

    let replay = stack
        .registry
        .generate(delivery(&stack, "other", T0, 42))
        .unwrap_err();
    assert_eq!(replay, TimeProofError::Replay(ProofNonce::from(42)));
    assert_eq!(EngineError::from(replay).kind(), ErrorKind::Replay);
}

#[tokio::test]
async fn test_generation_rejections() {
    let stack = Stack::new();

    let mut stranger = delivery(&stack, "p", T0, 1);
    stranger.requester = customer();
    assert!(matches!(
        stack.registry.generate(stranger),
        Err(TimeProofError::Unauthorized(_))
    ));

    let skewed = stack.registry.generate(delivery(&stack, "p", T0 + 301, 2));
    assert_eq!(
        EngineError::from(skewed.unwrap_err()).kind(),
        ErrorKind::ClockSkew
    );
    assert!(stack
        .registry
        .generate(delivery(&stack, "p", T0 - 300, 2))
        .is_ok());

    let mut bare = delivery(&stack, "p", T0, 3);
    bare.certificate_chain.clear();
    assert_eq!(
        stack.registry.generate(bare).unwrap_err(),
        TimeProofError::EmptyChain
    );
    // The rejected request did not burn its nonce.
    assert!(stack.registry.generate(delivery(&stack, "p", T0, 3)).is_ok());
}

#[tokio::test]
async fn test_proof_anchored_in_ledger_history() {
    let stack = Stack::new();
    // Three guarantees make three blocks.
    for i in 0..3 {
        stack
            .engine
            .create(request(&format!("anchor-{}", i), T0 + 48 * HOUR))
            .await
            .unwrap();
    }

    let hash = stack
        .registry
        .generate(delivery(&stack, "anchor-0", T0, 9))
        .unwrap();
    let proof = stack.registry.get(&hash).unwrap();
    assert_eq!(proof.commit_sequence(), 3);
    // Blocks 3, 2, 1, 0 and the root.
    assert_eq!(proof.proof_path.len(), 5);

    let result = stack.registry.verify(&hash).unwrap();
    assert!(result.valid);
    let names: Vec<&str> = result.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["ledger_position", "proof_path", "attestation", "certificate_chain"]
    );
}

// =========================================================================
// Proof-gated completion
// =========================================================================

#[tokio::test]
async fn test_completion_requires_verified_delivery_proof() {
    let stack = Stack::new();
    let mut req = request("gated", T0 + 48 * HOUR);
    req.requires_proof = true;
    let id = stack.engine.create(req).await.unwrap();

    let err = stack
        .engine
        .record_completion(&id, T0 + HOUR, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let unknown: Digest = [0xab; 32];
    assert_eq!(
        stack
            .engine
            .record_completion_with_proof(&id, &unknown)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );

    stack.clock.advance(HOUR);
    let proof = stack
        .registry
        .generate(delivery(&stack, "gated", T0 + HOUR - 120, 77))
        .unwrap();
    let status = stack
        .engine
        .record_completion_with_proof(&id, &proof)
        .await
        .unwrap();
    assert_eq!(status, GuaranteeStatus::Fulfilled);

    let g = stack.engine.get(&id).unwrap();
    assert_eq!(g.completed_at, Some(T0 + HOUR - 120));
    assert_eq!(g.last_proof, Some(proof));
    assert_eq!(stack.customer_balance(), 15);
}

#[tokio::test]
async fn test_late_proof_breaches() {
    let stack = Stack::new();
    let mut req = request("late-proof", T0 + HOUR);
    req.requires_proof = true;
    let id = stack.engine.create(req).await.unwrap();

    stack.clock.advance(2 * HOUR);
    let proof = stack
        .registry
        .generate(delivery(&stack, "late-proof", T0 + 2 * HOUR, 5))
        .unwrap();
    assert_eq!(
        stack
            .engine
            .record_completion_with_proof(&id, &proof)
            .await
            .unwrap(),
        GuaranteeStatus::Breached
    );
    assert!(stack.engine.get(&id).unwrap().penalty_paid);
}

// =========================================================================
// Audit trail
// =========================================================================

#[tokio::test]
async fn test_every_transition_is_stamped() {
    let stack = Stack::new();
    let id = stack
        .engine
        .create(request("audited", T0 + 48 * HOUR))
        .await
        .unwrap();
    let registration = stack.engine.get(&id).unwrap().last_proof.unwrap();

    stack.clock.advance(HOUR);
    stack.engine.cancel(&id, &customer()).await.unwrap();
    let cancellation = stack.engine.get(&id).unwrap().last_proof.unwrap();
    assert_ne!(registration, cancellation);

    for (hash, kind) in [
        (registration, EventKind::Registration),
        (cancellation, EventKind::Cancellation),
    ] {
        let proof = stack.registry.get(&hash).unwrap();
        assert_eq!(proof.event_kind, kind);
        assert_eq!(proof.subject_id, ItemId::new("audited"));
        assert!(stack.registry.verify(&hash).unwrap().valid);
    }
}
