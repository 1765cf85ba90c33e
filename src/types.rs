//! Shared types for the token detection engine.
//!
//! Addresses are carried as `alloy_primitives::Address` everywhere inside
//! the engine, so comparisons are always on raw bytes and never depend on
//! the letter case a collaborator happened to use. Strings are parsed at the
//! adapter boundary and emitted in EIP-55 checksum form.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

// ---------------------------------------------------------------------------
// Chain identity
// ---------------------------------------------------------------------------

/// A chain id in canonical lowercase hex form (`0x1`, `0x89`, ...).
///
/// Accepts hex (`0x01`, `0X89`) or decimal (`137`) input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn from_u64(id: u64) -> Self {
        Self(format!("0x{id:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the chain id. Always succeeds for a parsed id.
    pub fn as_u64(&self) -> u64 {
        u64::from_str_radix(&self.0[2..], 16).unwrap_or_default()
    }
}

impl FromStr for ChainId {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Self::from_u64)
            .map_err(|_| DetectError::Config(format!("invalid chain id: {s:?}")))
    }
}

impl TryFrom<String> for ChainId {
    type Error = DetectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainId> for String {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chains with a known candidate-token source.
pub const DEFAULT_SUPPORTED_CHAINS: &[u64] = &[
    0x1,        // Ethereum mainnet
    0x38,       // BNB Smart Chain
    0x89,       // Polygon
    0xa86a,     // Avalanche C-Chain
    0x4e454152, // Aurora
    0xe708,     // Linea
    0xa4b1,     // Arbitrum One
    0xa,        // Optimism
];

// ---------------------------------------------------------------------------
// Chain context
// ---------------------------------------------------------------------------

/// Connection handle the balance query uses to reach the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub rpc_url: String,
}

/// Block tracker settings attached to a network client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTrackerHandle {
    pub poll_interval_ms: u64,
}

impl Default for BlockTrackerHandle {
    fn default() -> Self {
        Self { poll_interval_ms: 20_000 }
    }
}

/// Everything one detection cycle needs to know about the chain it scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    pub chain_id: ChainId,
    pub network_client_id: String,
    pub provider: ProviderHandle,
    pub block_tracker: BlockTrackerHandle,
}

impl ChainContext {
    pub fn new(chain_id: ChainId, network_client_id: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            network_client_id: network_client_id.into(),
            provider: ProviderHandle { rpc_url: rpc_url.into() },
            block_tracker: BlockTrackerHandle::default(),
        }
    }

    /// Key used by the per-context reentrancy guard.
    pub fn key(&self) -> ContextKey {
        ContextKey {
            chain_id: self.chain_id.clone(),
            network_client_id: self.network_client_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub chain_id: ChainId,
    pub network_client_id: String,
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.network_client_id, self.chain_id)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// A token known to exist on a chain, not yet confirmed to be held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    #[serde(default)]
    pub aggregators: Vec<String>,
}

impl CandidateToken {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            name: None,
            icon_url: None,
            aggregators: Vec::new(),
        }
    }
}

/// A candidate the selected account holds a non-zero balance of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub aggregators: Vec<String>,
    pub balance: U256,
}

impl DetectedToken {
    pub fn from_candidate(candidate: &CandidateToken, balance: U256) -> Self {
        Self {
            address: candidate.address,
            symbol: candidate.symbol.clone(),
            decimals: candidate.decimals,
            name: candidate.name.clone(),
            icon_url: candidate.icon_url.clone(),
            aggregators: candidate.aggregators.clone(),
            balance,
        }
    }

    /// EIP-55 checksummed address, the form handed to the token registry.
    pub fn checksummed(&self) -> String {
        self.address.to_checksum(None)
    }
}

impl fmt::Display for DetectedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) balance={}", self.symbol, self.checksummed(), self.balance)
    }
}

/// Parse a hex address in any letter case.
pub fn parse_address(raw: &str) -> Result<Address, DetectError> {
    Address::from_str(raw.trim()).map_err(|_| DetectError::InvalidAddress(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Activation state
// ---------------------------------------------------------------------------

/// Wallet and UI state that decides whether detection may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationState {
    pub is_open: bool,
    pub is_unlocked: bool,
    pub selected_address: Option<Address>,
    /// User preference; detection never runs while this is off.
    pub use_token_detection: bool,
}

impl Default for ActivationState {
    fn default() -> Self {
        Self {
            is_open: false,
            is_unlocked: false,
            selected_address: None,
            use_token_detection: true,
        }
    }
}

/// Shared handle to the activation state.
///
/// Writers go through [`ActivationHandle::update`], which takes a plain
/// closure: the lock can never be held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ActivationHandle {
    inner: Arc<RwLock<ActivationState>>,
}

impl ActivationHandle {
    pub fn new(state: ActivationState) -> Self {
        Self { inner: Arc::new(RwLock::new(state)) }
    }

    pub fn snapshot(&self) -> ActivationState {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ActivationState) -> R) -> R {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for token detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Chain not supported for token detection: {0}")]
    ChainNotSupported(ChainId),

    #[error("Candidate source error ({chain_id}): {message}")]
    CandidateSource { chain_id: ChainId, message: String },

    #[error("Balance query error ({chain_id}): {message}")]
    BalanceQuery { chain_id: ChainId, message: String },

    #[error("Failed to add detected tokens on {chain_id}: {message}")]
    AddDetected { chain_id: ChainId, message: String },

    #[error("Unknown network client: {0}")]
    UnknownNetworkClient(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
