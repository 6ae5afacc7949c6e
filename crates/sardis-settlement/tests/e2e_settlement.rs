//! End-to-end settlement scenarios: verify -> policy -> route -> rail ->
//! ledger -> webhooks, against in-memory stores and simulated rails.

mod common;

use std::sync::Arc;

use common::*;
use sardis_ledger::LedgerStore;
use sardis_mandate::verifier::to_bundle;
use sardis_policy::ApprovalStatus;
use sardis_settlement::SettlementOutcome;
use sardis_types::{AgentId, KyaLevel, RejectReason};

async fn verify_and_dispatch(
    harness: &Harness,
    signer: &TestSigner,
    suffix: &str,
) -> SettlementOutcome {
    let (intent, cart, payment) = signed_bundle(signer, suffix, NOW);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
    let result = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    assert!(result.accepted, "verification rejected: {:?}", result.reason);
    harness.engine.dispatch_payment(&result.chain.unwrap()).await.unwrap()
}

#[tokio::test]
async fn happy_ap2_usdc_on_base() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");

    let outcome = verify_and_dispatch(&harness, &signer, "1").await;
    let SettlementOutcome::Settled { receipt, ledger_entry_id } = outcome else {
        panic!("expected settlement, got {outcome:?}");
    };

    assert_eq!(receipt.chain, "base");
    assert!(receipt.tx_hash.starts_with("0x"));
    assert!(receipt.block_number.is_some());

    // Ledger entry for exactly 5500 minor units, confirmed.
    let entry = harness.ledger.get(&ledger_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.amount_minor, 5_500);
    assert_eq!(entry.status, sardis_ledger::EntryStatus::Confirmed);
    assert_eq!(entry.audit_anchor, receipt.audit_anchor);

    // Policy spend advanced by exactly the settled amount.
    let policy = harness.policy.policy_for(&AgentId::from(SUBJECT)).await.unwrap().unwrap();
    assert_eq!(policy.spent_total, 5_500);
    assert_eq!(policy.daily.current_spent, 5_500);
}

#[tokio::test]
async fn happy_path_emits_lifecycle_webhooks() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");
    verify_and_dispatch(&harness, &signer, "1").await;

    // Drain the delivery queue.
    harness.flush_webhooks().await;
    let events = harness.transport.event_types();
    assert!(events.contains(&"payment.initiated".to_string()), "events: {events:?}");
    assert!(events.contains(&"payment.succeeded".to_string()), "events: {events:?}");
}

#[tokio::test]
async fn missing_intent_rejects_without_side_effects() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");
    let (intent, cart, payment) = signed_bundle(&signer, "1", NOW);
    let (_, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

    let result = harness
        .verifier
        .verify_chain_at(&serde_json::json!({}), &c, &p, NOW)
        .unwrap();
    assert!(!result.accepted);
    assert_eq!(result.reason, Some(RejectReason::InvalidPayload));

    // Zero ledger entries, and the untouched ids still verify later.
    assert_eq!(harness.ledger.len().await.unwrap(), 0);
    let outcome = verify_and_dispatch(&harness, &signer, "1").await;
    assert!(matches!(outcome, SettlementOutcome::Settled { .. }));
}

#[tokio::test]
async fn payment_exceeding_cart_total_rejected() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");
    let (intent, cart, mut payment) = signed_bundle(&signer, "1", NOW);
    payment.amount_minor = 10_000; // cart total is 5500
    payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

    let result = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    assert!(!result.accepted);
    assert_eq!(result.reason, Some(RejectReason::PaymentExceedsCartTotal));
    assert_eq!(harness.ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn policy_daily_cap_blocks_without_recording_spend() {
    let mut policy = sardis_policy::create_default_policy(
        AgentId::from(SUBJECT),
        sardis_policy::TrustLevel::Standard,
        NOW,
    );
    policy.daily.limit_amount = 500;
    policy.daily.current_spent = 480;
    let harness = Harness::with_policy(policy).await;
    let signer = TestSigner::new("did:sardis:agent-001");

    // Payment of 50 against 20 remaining daily budget.
    let (intent, cart, mut payment) = signed_bundle(&signer, "1", NOW);
    payment.amount_minor = 50;
    payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
    let verified = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    assert!(verified.accepted);

    let outcome = harness.engine.dispatch_payment(&verified.chain.unwrap()).await.unwrap();
    assert!(
        matches!(
            outcome,
            SettlementOutcome::Rejected { reason: RejectReason::TimeWindowLimit }
        ),
        "got {outcome:?}"
    );

    // No spend recorded, no ledger entry.
    let stored = harness.policy.policy_for(&AgentId::from(SUBJECT)).await.unwrap().unwrap();
    assert_eq!(stored.daily.current_spent, 480);
    assert_eq!(stored.spent_total, 0);
    assert_eq!(harness.ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn sanctioned_destination_blocks_settlement() {
    let harness = Harness::new().await;
    harness.sanctions.add(DESTINATION);
    let signer = TestSigner::new("did:sardis:agent-001");

    let outcome = verify_and_dispatch(&harness, &signer, "1").await;
    assert!(matches!(
        outcome,
        SettlementOutcome::Rejected { reason: RejectReason::SanctionsScreening }
    ));
    assert_eq!(harness.ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn idempotent_dispatch_creates_one_ledger_entry() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");
    let (intent, cart, payment) = signed_bundle(&signer, "1", NOW);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
    let verified = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    let chain = verified.chain.unwrap();

    let first = harness.engine.dispatch_payment(&chain).await.unwrap();
    let second = harness.engine.dispatch_payment(&chain).await.unwrap();

    let SettlementOutcome::Settled { receipt: r1, ledger_entry_id: id1 } = first else {
        panic!("first dispatch failed");
    };
    let SettlementOutcome::Settled { receipt: r2, ledger_entry_id: id2 } = second else {
        panic!("second dispatch failed");
    };

    // Both callers observe the same receipt; exactly one ledger entry.
    assert_eq!(r1.tx_hash, r2.tx_hash);
    assert_eq!(id1, id2);
    assert_eq!(harness.ledger.len().await.unwrap(), 1);

    let policy = harness.policy.policy_for(&AgentId::from(SUBJECT)).await.unwrap().unwrap();
    assert_eq!(policy.spent_total, 5_500);
}

#[tokio::test]
async fn concurrent_same_wallet_dispatches_sum_exactly() {
    let harness = Arc::new(Harness::new().await);
    let signer = TestSigner::new("did:sardis:agent-001");

    // Two distinct mandate chains on the same wallet, dispatched
    // concurrently. Both settle; spend equals the sum.
    let mut chains = Vec::new();
    for suffix in ["a", "b"] {
        let (intent, cart, payment) = signed_bundle(&signer, suffix, NOW);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
        let verified = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        chains.push(verified.chain.unwrap());
    }

    let mut handles = Vec::new();
    for chain in chains {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            harness.engine.dispatch_payment(&chain).await.unwrap()
        }));
    }
    let outcomes: Vec<SettlementOutcome> =
        futures_join_all(handles).await;

    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, SettlementOutcome::Settled { .. }))
        .count();
    assert_eq!(settled, 2, "outcomes: {outcomes:?}");

    let policy = harness.policy.policy_for(&AgentId::from(SUBJECT)).await.unwrap().unwrap();
    assert_eq!(policy.spent_total, 11_000);
    assert_eq!(harness.ledger.len().await.unwrap(), 2);
}

#[tokio::test]
async fn multi_sig_approval_suspends_then_resumes() {
    let harness = Harness::new().await;
    // Unverified agent: confidence 0.75 lands in the multi-sig tier.
    harness.agents.set(SUBJECT, KyaLevel::None);
    let signer = TestSigner::new("did:sardis:agent-001");

    let (intent, cart, payment) = signed_bundle(&signer, "1", NOW);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
    let verified = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    let chain = verified.chain.unwrap();

    let outcome = harness.engine.dispatch_payment(&chain).await.unwrap();
    let SettlementOutcome::PendingApproval { approval_id } = outcome else {
        panic!("expected pending approval, got {outcome:?}");
    };
    assert_eq!(harness.ledger.len().await.unwrap(), 0);

    // First approval does not reach quorum.
    let first = harness.approvals.approve(&approval_id, "x", None).await.unwrap();
    assert!(!first.quorum_reached);

    // A retry while pending stays suspended.
    let still_pending = harness.engine.dispatch_payment(&chain).await.unwrap();
    assert!(matches!(still_pending, SettlementOutcome::PendingApproval { .. }));

    // Second distinct approval reaches quorum; settlement resumes.
    let second = harness.approvals.approve(&approval_id, "y", None).await.unwrap();
    assert!(second.quorum_reached);
    assert_eq!(second.status, ApprovalStatus::Approved);

    let resumed = harness.engine.dispatch_payment(&chain).await.unwrap();
    assert!(matches!(resumed, SettlementOutcome::Settled { .. }), "got {resumed:?}");
    assert_eq!(harness.ledger.len().await.unwrap(), 1);

    // A late vote after completion is a no-op.
    let late = harness.approvals.approve(&approval_id, "z", None).await.unwrap();
    assert_eq!(late.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn rejected_approval_denies_settlement() {
    let harness = Harness::new().await;
    harness.agents.set(SUBJECT, KyaLevel::None);
    let signer = TestSigner::new("did:sardis:agent-001");

    let (intent, cart, payment) = signed_bundle(&signer, "1", NOW);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
    let chain = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap().chain.unwrap();

    let SettlementOutcome::PendingApproval { approval_id } =
        harness.engine.dispatch_payment(&chain).await.unwrap()
    else {
        panic!("expected pending approval");
    };

    harness
        .approvals
        .reject(&approval_id, "x", Some("supplier unverified".to_string()))
        .await
        .unwrap();

    let outcome = harness.engine.dispatch_payment(&chain).await.unwrap();
    let SettlementOutcome::ApprovalDenied { status, .. } = outcome else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(status, ApprovalStatus::Rejected);
    assert_eq!(harness.ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn replayed_bundle_rejected_after_settlement() {
    let harness = Harness::new().await;
    let signer = TestSigner::new("did:sardis:agent-001");
    let (intent, cart, payment) = signed_bundle(&signer, "1", NOW);
    let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

    let first = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    assert!(first.accepted);
    harness.engine.dispatch_payment(&first.chain.unwrap()).await.unwrap();

    let second = harness.verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
    assert!(!second.accepted);
    assert_eq!(second.reason, Some(RejectReason::ReplayDetected));
}

/// Minimal join-all to avoid pulling futures into the test crate.
async fn futures_join_all(
    handles: Vec<tokio::task::JoinHandle<SettlementOutcome>>,
) -> Vec<SettlementOutcome> {
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}
