//! Result merger: turns a cycle's raw detections into the final add-list.
//!
//! Re-applies ignore/tracked filtering against a fresh read of the store
//! (the user may have hidden or added a token while balances were in
//! flight) and drops duplicate addresses, keeping first occurrences in
//! their original order.

use alloy_primitives::Address;
use std::collections::HashSet;
use tracing::debug;

use crate::types::DetectedToken;

/// Stateless reconciliation of balance results with the token store.
pub struct ResultMerger;

impl ResultMerger {
    /// Keep tokens with a non-zero balance that are neither `ignored` nor
    /// `tracked`, first occurrence of each address, in input order.
    pub fn merge(
        detected: Vec<DetectedToken>,
        ignored: &HashSet<Address>,
        tracked: &HashSet<Address>,
    ) -> Vec<DetectedToken> {
        let before = detected.len();
        let mut seen: HashSet<Address> = HashSet::with_capacity(before);

        let merged: Vec<DetectedToken> = detected
            .into_iter()
            .filter(|t| !t.balance.is_zero())
            .filter(|t| !ignored.contains(&t.address) && !tracked.contains(&t.address))
            .filter(|t| seen.insert(t.address))
            .collect();

        if merged.len() != before {
            debug!(before, after = merged.len(), "Detections reconciled");
        }

        merged
    }
}
