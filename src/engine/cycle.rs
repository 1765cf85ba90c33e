//! Detection cycle: one scan of one chain context.
//!
//! gate → candidates → filter known → batched balance queries →
//! non-zero balances → merge → `add_detected`.
//!
//! Failures degrade to "try again next cycle": an unreachable candidate
//! source reads as an empty list, a failed balance batch drops only that
//! batch. Only a failed registry write is surfaced to the caller.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::gate::{ActivationGate, GateClosed};
use crate::engine::merger::ResultMerger;
use crate::sources::{BalanceQuery, CandidateSource, TokenStore};
use crate::types::{
    ActivationHandle, CandidateToken, ChainContext, ChainId, ContextKey, DetectError,
    DetectedToken,
};

/// Default number of tokens per balance query.
pub const DEFAULT_MAX_BATCH_WIDTH: usize = 1000;

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle for the same context is in flight.
    AlreadyRunning,
    Gate(GateClosed),
    /// The candidate source has no list for this chain.
    ChainNotSupported,
    NoCandidates,
    /// The wallet locked while the cycle ran and results are configured to be discarded.
    LockedMidCycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed,
}

/// Summary of a single cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub chain_id: ChainId,
    pub network_client_id: String,
    pub outcome: CycleOutcome,
    /// Candidates returned by the source.
    pub candidates: usize,
    /// Candidates left after removing tracked and ignored tokens.
    pub queried: usize,
    pub failed_batches: usize,
    /// Tokens handed to the registry.
    pub detected: Vec<DetectedToken>,
    pub started_at: DateTime<Utc>,
}

impl CycleReport {
    fn new(context: &ChainContext) -> Self {
        Self {
            chain_id: context.chain_id.clone(),
            network_client_id: context.network_client_id.clone(),
            outcome: CycleOutcome::Completed,
            candidates: 0,
            queried: 0,
            failed_batches: 0,
            detected: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn skipped(mut self, reason: SkipReason) -> Self {
        self.outcome = CycleOutcome::Skipped(reason);
        self
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Skipped(_))
    }
}

// ---------------------------------------------------------------------------
// Reentrancy guard
// ---------------------------------------------------------------------------

/// Holds a context key in the in-flight set until dropped.
struct InFlightGuard<'a> {
    running: &'a Mutex<HashSet<ContextKey>>,
    key: ContextKey,
}

impl<'a> InFlightGuard<'a> {
    /// `None` when the key is already running. Check and insert happen in one
    /// critical section.
    fn acquire(running: &'a Mutex<HashSet<ContextKey>>, key: ContextKey) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(Self { running, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

// ---------------------------------------------------------------------------
// Detection cycle
// ---------------------------------------------------------------------------

pub struct DetectionCycle {
    gate: ActivationGate,
    activation: ActivationHandle,
    candidates: Arc<dyn CandidateSource>,
    store: Arc<dyn TokenStore>,
    balances: Arc<dyn BalanceQuery>,
    max_batch_width: usize,
    discard_results_after_lock: bool,
    running: Mutex<HashSet<ContextKey>>,
}

impl DetectionCycle {
    pub fn new(
        gate: ActivationGate,
        activation: ActivationHandle,
        candidates: Arc<dyn CandidateSource>,
        store: Arc<dyn TokenStore>,
        balances: Arc<dyn BalanceQuery>,
    ) -> Self {
        Self {
            gate,
            activation,
            candidates,
            store,
            balances,
            max_batch_width: DEFAULT_MAX_BATCH_WIDTH,
            discard_results_after_lock: false,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Upper bound on tokens per balance query. Zero is treated as one.
    pub fn with_max_batch_width(mut self, width: usize) -> Self {
        self.max_batch_width = width.max(1);
        self
    }

    /// Drop a cycle's results if the wallet locked while it was running.
    pub fn with_discard_results_after_lock(mut self, discard: bool) -> Self {
        self.discard_results_after_lock = discard;
        self
    }

    pub fn activation(&self) -> &ActivationHandle {
        &self.activation
    }

    pub fn is_running(&self, context: &ChainContext) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&context.key())
    }

    /// Run one detection cycle for `context`.
    pub async fn run(&self, context: &ChainContext) -> Result<CycleReport, DetectError> {
        let mut report = CycleReport::new(context);

        let Some(_guard) = InFlightGuard::acquire(&self.running, context.key()) else {
            debug!(context = %context.key(), "Detection already in flight, dropping trigger");
            return Ok(report.skipped(SkipReason::AlreadyRunning));
        };

        // 1. Gate
        let state = self.activation.snapshot();
        if let Err(closed) = self.gate.check(&state, &context.chain_id) {
            debug!(chain_id = %context.chain_id, reason = %closed, "Detection not permitted");
            return Ok(report.skipped(SkipReason::Gate(closed)));
        }
        let Some(account) = state.selected_address else {
            return Ok(report.skipped(SkipReason::Gate(GateClosed::NoAccount)));
        };

        debug!(context = %context.key(), account = %account, "Starting detection cycle");

        // 2. Candidates
        let candidates = match self.candidates.candidates(&context.chain_id).await {
            Ok(list) => list,
            Err(e) => match e.downcast_ref::<DetectError>() {
                Some(DetectError::ChainNotSupported(_)) => {
                    debug!(chain_id = %context.chain_id, "Candidate source does not cover chain");
                    return Ok(report.skipped(SkipReason::ChainNotSupported));
                }
                _ => {
                    warn!(chain_id = %context.chain_id, error = %e, "Candidate fetch failed, treating as empty");
                    Vec::new()
                }
            },
        };

        report.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(report.skipped(SkipReason::NoCandidates));
        }

        // 3. Drop what the store already knows about
        let ignored = self.store.ignored(&context.chain_id).await;
        let tracked = self.store.tracked(&context.chain_id).await;
        let to_query = Self::unknown_candidates(candidates, &ignored, &tracked);
        report.queried = to_query.len();

        if to_query.is_empty() {
            debug!(chain_id = %context.chain_id, "Every candidate already tracked or ignored");
            return Ok(report);
        }

        // 4-5. Batched balance queries
        let (found, failed_batches) = self.query_balances(account, &to_query, context).await;
        report.failed_batches = failed_batches;

        if self.discard_results_after_lock && !self.activation.snapshot().is_unlocked {
            info!(
                chain_id = %context.chain_id,
                discarded = found.len(),
                "Wallet locked during detection, discarding results"
            );
            return Ok(report.skipped(SkipReason::LockedMidCycle));
        }

        // 6. Merge against a fresh view of the store, then hand off
        let ignored = self.store.ignored(&context.chain_id).await;
        let tracked = self.store.tracked(&context.chain_id).await;
        let merged = ResultMerger::merge(found, &ignored, &tracked);

        if merged.is_empty() {
            debug!(chain_id = %context.chain_id, queried = report.queried, "No new tokens detected");
            return Ok(report);
        }

        self.store
            .add_detected(&context.chain_id, merged.clone())
            .await
            .map_err(|e| DetectError::AddDetected {
                chain_id: context.chain_id.clone(),
                message: format!("{e:#}"),
            })?;

        for token in &merged {
            info!(chain_id = %context.chain_id, token = %token, "Token detected");
        }
        report.detected = merged;
        Ok(report)
    }

    /// Run a cycle on its own task and log the outcome.
    ///
    /// The returned handle is independent of whatever triggered the cycle:
    /// cancelling a timer never aborts a cycle that already started.
    pub fn spawn_run(self: &Arc<Self>, context: ChainContext) -> JoinHandle<()> {
        let cycle = Arc::clone(self);
        tokio::spawn(async move {
            match cycle.run(&context).await {
                Ok(report) => log_report(&report),
                Err(e) => error!(context = %context.key(), error = %e, "Detection cycle failed"),
            }
        })
    }

    // -- Helpers ---------------------------------------------------------

    /// Candidates neither tracked nor ignored, first occurrence of each address.
    fn unknown_candidates(
        candidates: Vec<CandidateToken>,
        ignored: &HashSet<Address>,
        tracked: &HashSet<Address>,
    ) -> Vec<CandidateToken> {
        let mut seen = HashSet::with_capacity(candidates.len());
        candidates
            .into_iter()
            .filter(|c| !ignored.contains(&c.address) && !tracked.contains(&c.address))
            .filter(|c| seen.insert(c.address))
            .collect()
    }

    /// Query every batch concurrently. Returns non-zero holdings in candidate
    /// order and the number of failed batches.
    async fn query_balances(
        &self,
        account: Address,
        candidates: &[CandidateToken],
        context: &ChainContext,
    ) -> (Vec<DetectedToken>, usize) {
        let batches: Vec<&[CandidateToken]> = candidates.chunks(self.max_batch_width).collect();

        let results = join_all(batches.iter().map(|batch| {
            let addresses: Vec<Address> = batch.iter().map(|c| c.address).collect();
            async move { self.balances.balances(account, &addresses, context).await }
        }))
        .await;

        let mut found = Vec::new();
        let mut failed = 0;

        for (index, (batch, result)) in batches.iter().zip(results).enumerate() {
            match result {
                Ok(balances) => found.extend(Self::holdings(batch, &balances)),
                Err(e) => {
                    failed += 1;
                    warn!(
                        chain_id = %context.chain_id,
                        batch = index,
                        size = batch.len(),
                        error = %e,
                        "Balance batch failed, dropping for this cycle"
                    );
                }
            }
        }

        (found, failed)
    }

    fn holdings(batch: &[CandidateToken], balances: &HashMap<Address, U256>) -> Vec<DetectedToken> {
        batch
            .iter()
            .filter_map(|c| match balances.get(&c.address) {
                Some(balance) if !balance.is_zero() => Some(DetectedToken::from_candidate(c, *balance)),
                _ => None,
            })
            .collect()
    }
}

fn log_report(report: &CycleReport) {
    match report.outcome {
        CycleOutcome::Skipped(reason) => debug!(
            chain_id = %report.chain_id,
            network_client_id = %report.network_client_id,
            reason = ?reason,
            "Detection cycle skipped"
        ),
        CycleOutcome::Completed => debug!(
            chain_id = %report.chain_id,
            network_client_id = %report.network_client_id,
            candidates = report.candidates,
            queried = report.queried,
            failed_batches = report.failed_batches,
            detected = report.detected.len(),
            "Detection cycle complete"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
