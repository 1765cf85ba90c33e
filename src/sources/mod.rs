//! External collaborators of the detection engine.
//!
//! Defines the traits the engine consumes and ships reference adapters:
//! - `token_api`: HTTP candidate-token list
//! - `rpc_balances`: batched JSON-RPC `balanceOf` queries
//! - `memory_store`: in-memory tracked/ignored token store
//! - `registry`: network client resolution from configuration

pub mod memory_store;
pub mod registry;
pub mod rpc_balances;
pub mod token_api;

use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[cfg(test)]
use mockall::automock;

use crate::types::{CandidateToken, ChainContext, ChainId, DetectedToken};

/// Source of candidate tokens for a chain.
///
/// Implementors return `DetectError::ChainNotSupported` (wrapped in
/// `anyhow::Error`) for chains they have no list for.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, chain_id: &ChainId) -> Result<Vec<CandidateToken>>;
}

/// The wallet's token registry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Addresses the user explicitly hid on this chain.
    async fn ignored(&self, chain_id: &ChainId) -> HashSet<Address>;

    /// Addresses already tracked (added or previously detected) on this chain.
    async fn tracked(&self, chain_id: &ChainId) -> HashSet<Address>;

    /// Record newly detected tokens. The only write the engine performs.
    async fn add_detected(&self, chain_id: &ChainId, tokens: Vec<DetectedToken>) -> Result<()>;
}

/// Batched balance lookup for one account.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    /// Balances of `account` for each token in `tokens`, issued as a single
    /// call. Tokens missing from the returned map count as zero.
    async fn balances(
        &self,
        account: Address,
        tokens: &[Address],
        context: &ChainContext,
    ) -> Result<HashMap<Address, U256>>;
}

/// Resolves a network client id to the chain it connects to.
#[cfg_attr(test, automock)]
pub trait NetworkClientResolver: Send + Sync {
    fn resolve(&self, network_client_id: &str) -> Result<ChainContext>;
}
