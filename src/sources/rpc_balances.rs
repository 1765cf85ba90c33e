//! JSON-RPC balance query.
//!
//! Sends one JSON-RPC batch per call: an `eth_call` of ERC-20
//! `balanceOf(account)` for every token, against the context's provider URL.
//! Tokens whose individual call errors (non-ERC-20 contract, revert) are
//! left out of the result, which the engine reads as a zero balance.

use alloy_primitives::{hex, Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

use super::BalanceQuery;
use crate::types::{ChainContext, ChainId, DetectError};

/// `bytes4(keccak256("balanceOf(address)"))`
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: usize,
    method: &'static str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<usize>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcReply {
    Batch(Vec<RpcResponse>),
    Single(RpcResponse),
}

pub struct RpcBalanceClient {
    http: Client,
}

impl RpcBalanceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for JSON-RPC")?;
        Ok(Self { http })
    }

    fn balance_of_calldata(account: Address) -> String {
        format!("0x{BALANCE_OF_SELECTOR}{:0>64}", hex::encode(account.as_slice()))
    }

    fn build_batch(account: Address, tokens: &[Address]) -> Vec<RpcRequest> {
        let data = Self::balance_of_calldata(account);
        tokens
            .iter()
            .enumerate()
            .map(|(id, token)| RpcRequest {
                jsonrpc: "2.0",
                id,
                method: "eth_call",
                params: json!([{ "to": token.to_checksum(None), "data": data }, "latest"]),
            })
            .collect()
    }

    /// Decode an ABI-encoded `uint256` return value.
    fn decode_uint(raw: &str) -> Option<U256> {
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        if digits.is_empty() {
            return None;
        }
        let word = digits.get(..digits.len().min(64))?;
        U256::from_str_radix(word, 16).ok()
    }

    fn collect_balances(
        chain_id: &ChainId,
        tokens: &[Address],
        reply: RpcReply,
    ) -> Result<HashMap<Address, U256>> {
        let responses = match reply {
            RpcReply::Batch(responses) => responses,
            RpcReply::Single(RpcResponse { error: Some(err), .. }) => {
                return Err(DetectError::BalanceQuery {
                    chain_id: chain_id.clone(),
                    message: format!("batch rejected ({}): {}", err.code, err.message),
                }
                .into());
            }
            RpcReply::Single(single) => vec![single],
        };

        let mut balances = HashMap::with_capacity(tokens.len());
        for response in responses {
            let Some(token) = response.id.and_then(|id| tokens.get(id)) else {
                continue;
            };
            if let Some(err) = response.error {
                trace!(token = %token, code = err.code, message = %err.message, "balanceOf failed");
                continue;
            }
            if let Some(balance) = response.result.as_deref().and_then(Self::decode_uint) {
                balances.insert(*token, balance);
            }
        }
        Ok(balances)
    }
}

#[async_trait]
impl BalanceQuery for RpcBalanceClient {
    async fn balances(
        &self,
        account: Address,
        tokens: &[Address],
        context: &ChainContext,
    ) -> Result<HashMap<Address, U256>> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let batch = Self::build_batch(account, tokens);
        debug!(chain_id = %context.chain_id, calls = batch.len(), "Sending balanceOf batch");

        let resp = self
            .http
            .post(&context.provider.rpc_url)
            .json(&batch)
            .send()
            .await
            .context("JSON-RPC request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DetectError::BalanceQuery {
                chain_id: context.chain_id.clone(),
                message: format!("HTTP {status}: {body}"),
            }
            .into());
        }

        let reply: RpcReply = resp
            .json()
            .await
            .context("Failed to parse JSON-RPC batch response")?;

        Self::collect_balances(&context.chain_id, tokens, reply)
    }
}
