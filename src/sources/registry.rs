//! Network client registry built from `[[networks]]` configuration.

use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use super::NetworkClientResolver;
use crate::config::NetworkConfig;
use crate::types::{BlockTrackerHandle, ChainContext, DetectError};

#[derive(Debug, Default, Clone)]
pub struct NetworkRegistry {
    clients: HashMap<String, ChainContext>,
}

impl NetworkRegistry {
    pub fn new(contexts: impl IntoIterator<Item = ChainContext>) -> Self {
        Self {
            clients: contexts
                .into_iter()
                .map(|ctx| (ctx.network_client_id.clone(), ctx))
                .collect(),
        }
    }

    /// Resolves every RPC URL up front; a missing env var fails the whole load.
    pub fn from_config(networks: &[NetworkConfig]) -> Result<Self> {
        let mut contexts = Vec::with_capacity(networks.len());
        for network in networks {
            let mut context = ChainContext::new(
                network.chain_id.clone(),
                network.id.clone(),
                network.resolve_rpc_url()?,
            );
            if let Some(poll_interval_ms) = network.block_poll_interval_ms {
                context.block_tracker = BlockTrackerHandle { poll_interval_ms };
            }
            debug!(network_client_id = %network.id, chain_id = %network.chain_id, "Registered network client");
            contexts.push(context);
        }
        Ok(Self::new(contexts))
    }

    pub fn get(&self, network_client_id: &str) -> Option<&ChainContext> {
        self.clients.get(network_client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl NetworkClientResolver for NetworkRegistry {
    fn resolve(&self, network_client_id: &str) -> Result<ChainContext> {
        self.get(network_client_id)
            .cloned()
            .ok_or_else(|| DetectError::UnknownNetworkClient(network_client_id.to_string()).into())
    }
}
