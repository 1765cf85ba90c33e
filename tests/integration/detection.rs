//! End-to-end detection cycles against the fakes.

use alloy_primitives::U256;
use std::sync::Arc;
use std::time::Duration;

use token_sentry::engine::{ActivationGate, CycleOutcome, DetectionCycle, GateClosed, SkipReason};
use token_sentry::sources::TokenStore;
use token_sentry::types::{ActivationState, ChainContext, ChainId, DetectError};

use crate::fakes::*;

#[tokio::test]
async fn test_only_nonzero_balances_are_detected() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[0x0a, 0x0b]),
        FakeBalances::new(&[(0x0a, 10), (0x0b, 0)]),
        ready(),
    );

    let report = harness.build().run(&mainnet()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.queried, 2);
    assert_eq!(report.detected.len(), 1);
    assert_eq!(report.detected[0].address, token(0x0a));
    assert_eq!(report.detected[0].balance, U256::from(10u64));

    let stored = harness.store.detected(&ChainId::from_u64(1));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].symbol, "TK10");
}

#[tokio::test]
async fn test_known_tokens_are_not_queried_or_emitted() {
    let chain = ChainId::from_u64(1);
    let harness = Harness::new(
        FakeCandidates::new().with_list(chain.clone(), &[1, 2, 3]),
        FakeBalances::new(&[(1, 5), (2, 5), (3, 5)]),
        ready(),
    );
    harness.store.add_token(&chain, token(1));
    harness.store.ignore_token(&chain, token(2));

    let report = harness.build().run(&mainnet()).await.unwrap();

    assert_eq!(report.queried, 1);
    assert_eq!(harness.balances.calls()[0].tokens, vec![token(3)]);
    assert_eq!(report.detected.len(), 1);
    assert_eq!(report.detected[0].address, token(3));
    assert!(!harness.store.tracked(&chain).await.contains(&token(2)));
}

#[tokio::test]
async fn test_second_cycle_finds_nothing_new() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 5)]),
        ready(),
    );
    let cycle = harness.build();

    assert_eq!(cycle.run(&mainnet()).await.unwrap().detected.len(), 1);
    let second = cycle.run(&mainnet()).await.unwrap();
    assert_eq!(second.queried, 0);
    assert!(second.detected.is_empty());
    assert_eq!(harness.balances.call_count(), 1);
}

#[tokio::test]
async fn test_locked_wallet_makes_no_balance_calls() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 5)]),
        ActivationState { is_unlocked: false, ..ready() },
    );

    let report = harness.build().run(&mainnet()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::Gate(GateClosed::Locked)));
    assert!(harness.candidates.calls().is_empty());
    assert_eq!(harness.balances.call_count(), 0);
}

#[tokio::test]
async fn test_chain_outside_allow_list_is_a_silent_no_op() {
    let harness = Harness::new(FakeCandidates::new(), FakeBalances::new(&[]), ready());
    let sepolia = ChainContext::new(ChainId::from_u64(0xaa36a7), "sepolia", "http://localhost:8545");

    let report = harness.build().run(&sepolia).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::Gate(GateClosed::ChainUnsupported)));
    assert_eq!(harness.balances.call_count(), 0);
}

#[tokio::test]
async fn test_source_without_list_for_chain_is_a_no_op() {
    let harness = Harness::new(
        FakeCandidates::new().unsupported(ChainId::from_u64(1)),
        FakeBalances::new(&[]),
        ready(),
    );

    let report = harness.build().run(&mainnet()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::ChainNotSupported));
    assert_eq!(harness.balances.call_count(), 0);
}

#[tokio::test]
async fn test_candidate_source_failure_reads_as_empty() {
    let harness = Harness::new(FakeCandidates::new(), FakeBalances::new(&[]), ready());
    harness.candidates.set_error("connection refused");

    let report = harness.build().run(&mainnet()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::NoCandidates));
    assert_eq!(harness.balances.call_count(), 0);
}

#[tokio::test]
async fn test_failed_batch_does_not_sink_the_others() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1, 2, 3, 4]),
        FakeBalances::new(&[(1, 1), (2, 1), (3, 1), (4, 1)]),
        ready(),
    );
    harness.balances.poison(token(2));
    let cycle = harness.build().with_max_batch_width(2);

    let report = cycle.run(&mainnet()).await.unwrap();

    assert_eq!(harness.balances.call_count(), 2);
    assert_eq!(report.failed_batches, 1);
    let found: Vec<_> = report.detected.iter().map(|t| t.address).collect();
    assert_eq!(found, vec![token(3), token(4)]);
}

#[tokio::test]
async fn test_add_failure_surfaces_as_error() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 1)]),
        ready(),
    );
    let cycle = DetectionCycle::new(
        ActivationGate::default(),
        harness.activation.clone(),
        harness.candidates.clone(),
        Arc::new(FailingStore),
        harness.balances.clone(),
    );

    let err = cycle.run(&mainnet()).await.unwrap_err();
    assert!(matches!(err, DetectError::AddDetected { .. }));
    assert!(!cycle.is_running(&mainnet()));
}

#[tokio::test]
async fn test_overlapping_runs_share_one_balance_sequence() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 1)]),
        ready(),
    );
    let (entered, release) = harness.balances.hold();
    let cycle = harness.cycle();

    let first = {
        let cycle = cycle.clone();
        tokio::spawn(async move { cycle.run(&mainnet()).await })
    };
    entered.notified().await;

    let second = cycle.run(&mainnet()).await.unwrap();
    assert_eq!(second.outcome, CycleOutcome::Skipped(SkipReason::AlreadyRunning));

    // A different context is not blocked by the one in flight.
    let other = cycle.run(&polygon()).await.unwrap();
    assert_eq!(other.outcome, CycleOutcome::Skipped(SkipReason::NoCandidates));

    release.notify_one();
    let first = tokio::time::timeout(Duration::from_secs(1), first).await.unwrap().unwrap().unwrap();
    assert_eq!(first.detected.len(), 1);
    assert_eq!(harness.balances.call_count(), 1);
}

#[tokio::test]
async fn test_lock_mid_cycle_still_emits_by_default() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 7)]),
        ready(),
    );
    let (entered, release) = harness.balances.hold();
    let cycle = harness.cycle();

    let in_flight = {
        let cycle = cycle.clone();
        tokio::spawn(async move { cycle.run(&mainnet()).await })
    };
    entered.notified().await;
    harness.activation.update(|s| s.is_unlocked = false);
    release.notify_one();

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(harness.store.detected(&ChainId::from_u64(1)).len(), 1);

    // No new cycle gets past the gate until unlock.
    let next = cycle.run(&mainnet()).await.unwrap();
    assert_eq!(next.outcome, CycleOutcome::Skipped(SkipReason::Gate(GateClosed::Locked)));
    assert_eq!(harness.balances.call_count(), 1);
}

#[tokio::test]
async fn test_lock_mid_cycle_discards_when_configured() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 7)]),
        ready(),
    );
    let (entered, release) = harness.balances.hold();
    let cycle = Arc::new(harness.build().with_discard_results_after_lock(true));

    let in_flight = {
        let cycle = cycle.clone();
        tokio::spawn(async move { cycle.run(&mainnet()).await })
    };
    entered.notified().await;
    harness.activation.update(|s| s.is_unlocked = false);
    release.notify_one();

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::LockedMidCycle));
    assert!(report.detected.is_empty());
    assert!(harness.store.detected(&ChainId::from_u64(1)).is_empty());
}

#[tokio::test]
async fn test_token_ignored_during_balance_query_is_not_emitted() {
    let chain = ChainId::from_u64(1);
    let harness = Harness::new(
        FakeCandidates::new().with_list(chain.clone(), &[1, 2]),
        FakeBalances::new(&[(1, 4), (2, 9)]),
        ready(),
    );
    let (entered, release) = harness.balances.hold();
    let cycle = harness.cycle();

    let in_flight = {
        let cycle = cycle.clone();
        tokio::spawn(async move { cycle.run(&mainnet()).await })
    };
    entered.notified().await;
    harness.store.ignore_token(&chain, token(2));
    release.notify_one();

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.queried, 2);
    let found: Vec<_> = report.detected.iter().map(|t| t.address).collect();
    assert_eq!(found, vec![token(1)]);
    let stored: Vec<_> = harness.store.detected(&chain).iter().map(|t| t.address).collect();
    assert_eq!(stored, vec![token(1)]);
}
