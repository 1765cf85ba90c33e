//! Scheduler timing, driven by paused tokio time.

use std::time::Duration;

use token_sentry::engine::{ClientPoller, LegacyPoller};
use token_sentry::types::{ChainId, DetectError};

use crate::fakes::*;

/// Candidates with zero balance, so nothing becomes tracked and every cycle
/// reaches the balance query.
fn zero_balance_harness() -> Harness {
    Harness::new(
        FakeCandidates::new()
            .with_list(ChainId::from_u64(1), &[1, 2])
            .with_list(ChainId::from_u64(0x89), &[3]),
        FakeBalances::new(&[]),
        ready(),
    )
}

async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_per_client_polling_fires_at_start_and_each_interval() {
    let harness = zero_balance_harness();
    let poller = ClientPoller::new(harness.cycle(), registry(), Duration::from_millis(1000));

    poller.start_polling_by_network_client_id("mainnet").unwrap();
    settle().await;
    assert_eq!(harness.balances.call_count(), 1);

    advance(999).await;
    assert_eq!(harness.balances.call_count(), 1);

    advance(1).await;
    let calls = harness.balances.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.chain_id.as_str() == "0x1"));

    poller.stop_all_polling();
}

#[tokio::test(start_paused = true)]
async fn test_per_client_loops_are_independent() {
    let harness = zero_balance_harness();
    let poller = ClientPoller::new(harness.cycle(), registry(), Duration::from_millis(1000));

    poller.start_polling_by_network_client_id("mainnet").unwrap();
    poller.start_polling_by_network_client_id("polygon").unwrap();
    // Starting an active client again reuses its loop.
    poller.start_polling_by_network_client_id("mainnet").unwrap();
    settle().await;
    assert_eq!(poller.active_network_clients(), vec!["mainnet", "polygon"]);
    assert_eq!(harness.balances.call_count(), 2);

    assert!(poller.stop_polling_by_network_client_id("mainnet"));
    advance(1000).await;

    let calls = harness.balances.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].chain_id, ChainId::from_u64(0x89));
    assert_eq!(poller.active_network_clients(), vec!["polygon"]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_client_is_rejected() {
    let harness = zero_balance_harness();
    let poller = ClientPoller::new(harness.cycle(), registry(), Duration::from_millis(1000));

    let err = poller.start_polling_by_network_client_id("goerli").unwrap_err();
    assert!(matches!(err, DetectError::UnknownNetworkClient(id) if id == "goerli"));
    assert!(poller.active_network_clients().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_legacy_first_tick_after_one_interval() {
    let harness = zero_balance_harness();
    let poller = LegacyPoller::new(harness.cycle(), Duration::from_millis(1000), Some(mainnet()));

    poller.start();
    settle().await;
    assert_eq!(harness.balances.call_count(), 0);

    advance(1000).await;
    assert_eq!(harness.balances.call_count(), 1);

    advance(1000).await;
    assert_eq!(harness.balances.call_count(), 2);
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn test_legacy_follows_retarget_without_phase_reset() {
    let harness = zero_balance_harness();
    let poller = LegacyPoller::new(harness.cycle(), Duration::from_millis(1000), Some(mainnet()));
    poller.start();

    advance(600).await;
    poller.retarget(polygon());
    advance(400).await;

    let calls = harness.balances.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].chain_id, ChainId::from_u64(0x89));
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn test_legacy_restart_detects_and_resets_phase() {
    let harness = zero_balance_harness();
    let poller = LegacyPoller::new(harness.cycle(), Duration::from_millis(1000), Some(mainnet()));
    poller.start();

    advance(600).await;
    poller.restart().expect("active chain present").await.unwrap();
    assert_eq!(harness.balances.call_count(), 1);

    // Old phase would have ticked at t=1000.
    advance(400).await;
    assert_eq!(harness.balances.call_count(), 1);

    advance(600).await;
    assert_eq!(harness.balances.call_count(), 2);
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn test_ticks_while_locked_do_nothing() {
    let harness = zero_balance_harness();
    let poller = ClientPoller::new(harness.cycle(), registry(), Duration::from_millis(1000));
    harness.activation.update(|s| s.is_unlocked = false);

    poller.start_polling_by_network_client_id("mainnet").unwrap();
    settle().await;
    advance(1000).await;
    advance(1000).await;
    assert_eq!(harness.balances.call_count(), 0);
    assert!(harness.candidates.calls().is_empty());

    harness.activation.update(|s| s.is_unlocked = true);
    advance(1000).await;
    assert_eq!(harness.balances.call_count(), 1);
    poller.stop_all_polling();
}

#[tokio::test(start_paused = true)]
async fn test_stopping_a_loop_does_not_abort_in_flight_cycle() {
    let harness = Harness::new(
        FakeCandidates::new().with_list(ChainId::from_u64(1), &[1]),
        FakeBalances::new(&[(1, 3)]),
        ready(),
    );
    let (entered, release) = harness.balances.hold();
    let poller = ClientPoller::new(harness.cycle(), registry(), Duration::from_millis(1000));

    poller.start_polling_by_network_client_id("mainnet").unwrap();
    entered.notified().await;
    poller.stop_all_polling();
    release.notify_one();
    settle().await;

    assert_eq!(harness.store.detected(&ChainId::from_u64(1)).len(), 1);
}
