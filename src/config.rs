//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! RPC URLs that embed API keys are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::types::{parse_address, ChainId, DetectError, DEFAULT_SUPPORTED_CHAINS};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// Network client the legacy poller and the event binder start on.
    #[serde(default)]
    pub active_network: Option<String>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub token_api: TokenApiConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Single loop following the active network. When false, only the
    /// clients in `poll_network_clients` are polled.
    #[serde(default = "default_true")]
    pub legacy_mode: bool,
    #[serde(default = "default_supported_chains")]
    pub supported_chains: Vec<ChainId>,
    #[serde(default = "default_max_batch_width")]
    pub max_batch_width: usize,
    #[serde(default)]
    pub discard_results_after_lock: bool,
    #[serde(default)]
    pub poll_network_clients: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            legacy_mode: true,
            supported_chains: default_supported_chains(),
            max_batch_width: default_max_batch_width(),
            discard_results_after_lock: false,
            poll_network_clients: Vec::new(),
        }
    }
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    #[serde(default)]
    pub selected_address: Option<String>,
    #[serde(default = "default_true")]
    pub start_unlocked: bool,
    #[serde(default = "default_true")]
    pub start_open: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            selected_address: None,
            start_unlocked: true,
            start_open: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TokenApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Settings for the JSON-RPC balance client.
#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub id: String,
    pub chain_id: ChainId,
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Env var holding the RPC URL. Takes precedence over `rpc_url`.
    #[serde(default)]
    pub rpc_url_env: Option<String>,
    #[serde(default)]
    pub block_poll_interval_ms: Option<u64>,
}

impl NetworkConfig {
    pub fn resolve_rpc_url(&self) -> Result<String> {
        if let Some(env_name) = &self.rpc_url_env {
            return AppConfig::resolve_env(env_name);
        }
        self.rpc_url
            .clone()
            .with_context(|| format!("Network {} has neither rpc_url nor rpc_url_env", self.id))
    }
}

fn default_interval_ms() -> u64 {
    180_000
}

fn default_true() -> bool {
    true
}

fn default_supported_chains() -> Vec<ChainId> {
    DEFAULT_SUPPORTED_CHAINS.iter().copied().map(ChainId::from_u64).collect()
}

fn default_max_batch_width() -> usize {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        if self.detection.interval_ms == 0 {
            return Err(DetectError::Config("detection.interval_ms must be positive".into()));
        }
        if self.detection.max_batch_width == 0 {
            return Err(DetectError::Config("detection.max_batch_width must be positive".into()));
        }
        if self.token_api.timeout_secs == 0 {
            return Err(DetectError::Config("token_api.timeout_secs must be positive".into()));
        }
        if self.rpc.timeout_secs == 0 {
            return Err(DetectError::Config("rpc.timeout_secs must be positive".into()));
        }
        if let Some(address) = &self.account.selected_address {
            parse_address(address)?;
        }

        let mut ids = HashSet::new();
        for network in &self.networks {
            if !ids.insert(network.id.as_str()) {
                return Err(DetectError::Config(format!("duplicate network id: {}", network.id)));
            }
        }
        if let Some(active) = &self.active_network {
            if !ids.contains(active.as_str()) {
                return Err(DetectError::Config(format!("active_network {active} is not configured")));
            }
        }
        for id in &self.detection.poll_network_clients {
            if !ids.contains(id.as_str()) {
                return Err(DetectError::Config(format!("poll_network_clients entry {id} is not configured")));
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
