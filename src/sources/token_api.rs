//! Token list API: candidate tokens per chain over HTTP.
//!
//! `GET {base_url}/tokens/{decimal chain id}` returns either a JSON array of
//! tokens or an object like `{"error": "ChainId 3 is not supported"}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::CandidateSource;
use crate::types::{parse_address, CandidateToken, ChainId, DetectError};

/// Public token list endpoint.
pub const DEFAULT_BASE_URL: &str = "https://token-api.metaswap.codefi.network";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiToken {
    address: String,
    symbol: String,
    decimals: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(default)]
    aggregators: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse {
    Tokens(Vec<ApiToken>),
    Error { error: String },
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TokenApiClient {
    http: Client,
    base_url: String,
}

impl TokenApiClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("token-sentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for token API")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn url_for(&self, chain_id: &ChainId) -> String {
        format!("{}/tokens/{}", self.base_url, chain_id.as_u64())
    }

    /// Decode a response body into candidates. Entries with malformed
    /// addresses are skipped.
    fn parse_body(chain_id: &ChainId, body: &str) -> Result<Vec<CandidateToken>> {
        let parsed: ApiResponse = serde_json::from_str(body)
            .with_context(|| format!("Failed to parse token list for {chain_id}"))?;

        let tokens = match parsed {
            ApiResponse::Tokens(tokens) => tokens,
            ApiResponse::Error { error } => {
                if error.to_lowercase().contains("not supported") {
                    return Err(DetectError::ChainNotSupported(chain_id.clone()).into());
                }
                return Err(DetectError::CandidateSource {
                    chain_id: chain_id.clone(),
                    message: error,
                }
                .into());
            }
        };

        let candidates = tokens
            .into_iter()
            .filter_map(|t| match parse_address(&t.address) {
                Ok(address) => Some(CandidateToken {
                    address,
                    symbol: t.symbol,
                    decimals: t.decimals,
                    name: t.name,
                    icon_url: t.icon_url,
                    aggregators: t.aggregators,
                }),
                Err(e) => {
                    warn!(chain_id = %chain_id, error = %e, "Skipping malformed token list entry");
                    None
                }
            })
            .collect();

        Ok(candidates)
    }
}

#[async_trait]
impl CandidateSource for TokenApiClient {
    async fn candidates(&self, chain_id: &ChainId) -> Result<Vec<CandidateToken>> {
        let url = self.url_for(chain_id);
        debug!(url = %url, "Fetching token list");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Token API request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("Failed to read token API response")?;

        // Unsupported chains come back as an error object, sometimes with a 4xx.
        if !status.is_success() && !body.contains("\"error\"") {
            anyhow::bail!("Token API error {status}: {body}");
        }

        let candidates = Self::parse_body(chain_id, &body)?;
        debug!(chain_id = %chain_id, count = candidates.len(), "Token list fetched");
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
