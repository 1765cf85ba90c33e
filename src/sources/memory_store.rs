//! In-memory token store.
//!
//! Keeps tracked, detected and ignored tokens per chain for the lifetime of
//! the process. Optionally publishes `TokensChanged` on every write so the
//! event binder sees store updates.

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::TokenStore;
use crate::engine::events::WalletEvent;
use crate::types::{ChainId, DetectedToken};

#[derive(Debug, Default)]
struct ChainTokens {
    /// Tokens the user added by hand.
    added: HashSet<Address>,
    /// Tokens surfaced by detection, in arrival order.
    detected: Vec<DetectedToken>,
    ignored: HashSet<Address>,
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    chains: RwLock<HashMap<ChainId, ChainTokens>>,
    events: Option<UnboundedSender<WalletEvent>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `WalletEvent::TokensChanged` on `events` after each write.
    pub fn with_events(events: UnboundedSender<WalletEvent>) -> Self {
        Self {
            chains: RwLock::default(),
            events: Some(events),
        }
    }

    pub fn add_token(&self, chain_id: &ChainId, address: Address) {
        self.write(chain_id, |tokens| {
            tokens.added.insert(address);
        });
    }

    /// Hide a token. Also removes it from the detected list.
    pub fn ignore_token(&self, chain_id: &ChainId, address: Address) {
        self.write(chain_id, |tokens| {
            tokens.ignored.insert(address);
            tokens.added.remove(&address);
            tokens.detected.retain(|t| t.address != address);
        });
    }

    pub fn detected(&self, chain_id: &ChainId) -> Vec<DetectedToken> {
        self.read(chain_id, |tokens| tokens.detected.clone())
    }

    fn read<R: Default>(&self, chain_id: &ChainId, f: impl FnOnce(&ChainTokens) -> R) -> R {
        let chains = self.chains.read().unwrap_or_else(|p| p.into_inner());
        chains.get(chain_id).map(f).unwrap_or_default()
    }

    fn write(&self, chain_id: &ChainId, f: impl FnOnce(&mut ChainTokens)) {
        {
            let mut chains = self.chains.write().unwrap_or_else(|p| p.into_inner());
            f(chains.entry(chain_id.clone()).or_default());
        }
        if let Some(events) = &self.events {
            let _ = events.send(WalletEvent::TokensChanged { chain_id: chain_id.clone() });
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn ignored(&self, chain_id: &ChainId) -> HashSet<Address> {
        self.read(chain_id, |tokens| tokens.ignored.clone())
    }

    async fn tracked(&self, chain_id: &ChainId) -> HashSet<Address> {
        self.read(chain_id, |tokens| {
            tokens
                .added
                .iter()
                .copied()
                .chain(tokens.detected.iter().map(|t| t.address))
                .collect()
        })
    }

    async fn add_detected(&self, chain_id: &ChainId, tokens: Vec<DetectedToken>) -> Result<()> {
        let count = tokens.len();
        self.write(chain_id, |known| {
            for token in tokens {
                if known.ignored.contains(&token.address)
                    || known.detected.iter().any(|t| t.address == token.address)
                {
                    debug!(token = %token, "Already known, not re-adding");
                    continue;
                }
                known.detected.push(token);
            }
        });
        info!(chain_id = %chain_id, count, "Detected tokens recorded");
        Ok(())
    }
}
