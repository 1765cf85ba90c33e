//! Activation gate: decides whether detection may run right now.
//!
//! Evaluated fresh at the start of every cycle; the state may have changed
//! between scheduling a cycle and running it.

use std::collections::HashSet;
use std::fmt;

use crate::types::{ActivationState, ChainId, DEFAULT_SUPPORTED_CHAINS};

/// Why the gate is closed. Checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateClosed {
    Hidden,
    Locked,
    DetectionDisabled,
    NoAccount,
    ChainUnsupported,
}

impl fmt::Display for GateClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateClosed::Hidden => "ui not open",
            GateClosed::Locked => "wallet locked",
            GateClosed::DetectionDisabled => "token detection disabled",
            GateClosed::NoAccount => "no selected account",
            GateClosed::ChainUnsupported => "chain unsupported",
        };
        f.write_str(s)
    }
}

/// Decides whether a detection cycle may run for a chain given the current
/// activation state. Holds the chain allow-list; everything else is read
/// from the state passed to each check.
#[derive(Debug, Clone)]
pub struct ActivationGate {
    supported: HashSet<ChainId>,
}

impl ActivationGate {
    /// Gate allowing detection on `supported` chains only.
    pub fn new(supported: impl IntoIterator<Item = ChainId>) -> Self {
        Self {
            supported: supported.into_iter().collect(),
        }
    }

    /// Whether `chain_id` is on the allow-list.
    pub fn is_supported(&self, chain_id: &ChainId) -> bool {
        self.supported.contains(chain_id)
    }

    /// `Ok(())` when detection is permitted, otherwise the first reason it isn't.
    pub fn check(&self, state: &ActivationState, chain_id: &ChainId) -> Result<(), GateClosed> {
        if !state.is_open {
            return Err(GateClosed::Hidden);
        }
        if !state.is_unlocked {
            return Err(GateClosed::Locked);
        }
        if !state.use_token_detection {
            return Err(GateClosed::DetectionDisabled);
        }
        if state.selected_address.is_none() {
            return Err(GateClosed::NoAccount);
        }
        if !self.is_supported(chain_id) {
            return Err(GateClosed::ChainUnsupported);
        }
        Ok(())
    }

    /// Boolean form of [`ActivationGate::check`].
    pub fn can_detect(&self, state: &ActivationState, chain_id: &ChainId) -> bool {
        self.check(state, chain_id).is_ok()
    }
}

impl Default for ActivationGate {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORTED_CHAINS.iter().copied().map(ChainId::from_u64))
    }
}
