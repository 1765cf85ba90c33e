//! Event binder: reacts to wallet, UI and network events.
//!
//! Handlers are synchronous: each reads and mutates the activation state in
//! one step, then at most spawns an immediate detection cycle. No handler
//! performs network I/O itself.
//!
//! Unlock, account changes and candidate list refreshes restart detection:
//! with a legacy poller attached its timer is re-armed from now, so the next
//! periodic tick lands one full interval after the immediate run.

use alloy_primitives::Address;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::cycle::DetectionCycle;
use crate::engine::scheduler::LegacyPoller;
use crate::types::{ActivationHandle, ChainContext, ChainId};

/// Everything the engine listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Unlock,
    Lock,
    SelectedAddressChanged(Address),
    NetworkChanged(ChainContext),
    /// The candidate list for a chain was refreshed.
    CandidateListChanged { chain_id: ChainId, count: usize },
    /// The wallet UI was opened (`true`) or closed.
    VisibilityChanged(bool),
    TokenDetectionToggled(bool),
    /// Tracked or ignored tokens changed in the store.
    TokensChanged { chain_id: ChainId },
}

pub struct EventBinder {
    activation: ActivationHandle,
    cycle: Arc<DetectionCycle>,
    legacy: Option<Arc<LegacyPoller>>,
    current: RwLock<Option<ChainContext>>,
}

impl EventBinder {
    /// `legacy` is retargeted on network changes when present.
    pub fn new(
        cycle: Arc<DetectionCycle>,
        legacy: Option<Arc<LegacyPoller>>,
        current: Option<ChainContext>,
    ) -> Self {
        Self {
            activation: cycle.activation().clone(),
            cycle,
            legacy,
            current: RwLock::new(current),
        }
    }

    pub fn current_context(&self) -> Option<ChainContext> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Apply one event. Returns the handle of the detection it triggered, if any.
    pub fn handle(&self, event: WalletEvent) -> Option<JoinHandle<()>> {
        match event {
            WalletEvent::Unlock => {
                self.activation.update(|s| s.is_unlocked = true);
                info!("Wallet unlocked");
                self.restart_detection()
            }
            WalletEvent::Lock => {
                // Loops keep ticking; the gate turns every tick into a no-op.
                self.activation.update(|s| s.is_unlocked = false);
                info!("Wallet locked");
                None
            }
            WalletEvent::SelectedAddressChanged(address) => {
                let changed = self.activation.update(|s| {
                    let changed = s.selected_address != Some(address);
                    s.selected_address = Some(address);
                    changed
                });
                if !changed {
                    return None;
                }
                info!(account = %address, "Selected account changed");
                self.restart_detection()
            }
            WalletEvent::NetworkChanged(context) => {
                info!(context = %context.key(), "Active network changed");
                if let Some(legacy) = &self.legacy {
                    legacy.retarget(context.clone());
                }
                *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(context);
                None
            }
            WalletEvent::CandidateListChanged { chain_id, count } => {
                let is_current = self
                    .current_context()
                    .is_some_and(|ctx| ctx.chain_id == chain_id);
                if !is_current || count == 0 {
                    debug!(chain_id = %chain_id, count, "Candidate list change ignored");
                    return None;
                }
                debug!(chain_id = %chain_id, count, "Candidate list changed");
                self.restart_detection()
            }
            WalletEvent::VisibilityChanged(open) => {
                let opened = self.activation.update(|s| {
                    let opened = open && !s.is_open;
                    s.is_open = open;
                    opened
                });
                if opened {
                    self.detect_now()
                } else {
                    None
                }
            }
            WalletEvent::TokenDetectionToggled(enabled) => {
                let enabled_now = self.activation.update(|s| {
                    let was = s.use_token_detection;
                    s.use_token_detection = enabled;
                    enabled && !was
                });
                info!(enabled, "Token detection preference changed");
                if enabled_now {
                    self.detect_now()
                } else {
                    None
                }
            }
            WalletEvent::TokensChanged { chain_id } => {
                // The store is re-read on every cycle.
                debug!(chain_id = %chain_id, "Token store changed");
                None
            }
        }
    }

    /// Drain `events` on a background task until every sender is gone.
    pub fn bind(self: Arc<Self>, mut events: UnboundedReceiver<WalletEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event);
            }
            debug!("Event stream closed");
        })
    }

    /// Detect now and, in legacy mode, restart the timer phase.
    fn restart_detection(&self) -> Option<JoinHandle<()>> {
        match &self.legacy {
            Some(legacy) if legacy.is_running() => legacy.restart(),
            _ => self.detect_now(),
        }
    }

    fn detect_now(&self) -> Option<JoinHandle<()>> {
        match self.current_context() {
            Some(context) => Some(self.cycle.spawn_run(context)),
            None => {
                debug!("No active network, skipping immediate detection");
                None
            }
        }
    }
}
