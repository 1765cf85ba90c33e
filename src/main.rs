//! TOKEN SENTRY: background ERC-20 token detection for a wallet.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the reference adapters into the detection engine, starts the
//! configured pollers and runs until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use token_sentry::config::AppConfig;
use token_sentry::engine::{ActivationGate, ClientPoller, DetectionCycle, EventBinder, LegacyPoller};
use token_sentry::sources::memory_store::InMemoryTokenStore;
use token_sentry::sources::registry::NetworkRegistry;
use token_sentry::sources::rpc_balances::RpcBalanceClient;
use token_sentry::sources::token_api::TokenApiClient;
use token_sentry::sources::NetworkClientResolver;
use token_sentry::types::{parse_address, ActivationHandle, ActivationState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        interval_ms = cfg.detection.interval_ms,
        legacy_mode = cfg.detection.legacy_mode,
        networks = cfg.networks.len(),
        "TOKEN SENTRY starting up"
    );

    // -- Initialise components -------------------------------------------

    let registry = Arc::new(NetworkRegistry::from_config(&cfg.networks)?);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let candidates = Arc::new(TokenApiClient::new(
        cfg.token_api.base_url.clone(),
        Duration::from_secs(cfg.token_api.timeout_secs),
    )?);
    let balances = Arc::new(RpcBalanceClient::new(Duration::from_secs(cfg.rpc.timeout_secs))?);
    let store = Arc::new(InMemoryTokenStore::with_events(events_tx.clone()));

    let selected_address = cfg
        .account
        .selected_address
        .as_deref()
        .map(parse_address)
        .transpose()?;
    if selected_address.is_none() {
        warn!("No account selected; detection stays idle until one is");
    }
    let activation = ActivationHandle::new(ActivationState {
        is_open: cfg.account.start_open,
        is_unlocked: cfg.account.start_unlocked,
        selected_address,
        use_token_detection: true,
    });

    let cycle = Arc::new(
        DetectionCycle::new(
            ActivationGate::new(cfg.detection.supported_chains.iter().cloned()),
            activation,
            candidates,
            store,
            balances,
        )
        .with_max_batch_width(cfg.detection.max_batch_width)
        .with_discard_results_after_lock(cfg.detection.discard_results_after_lock),
    );

    let active = cfg
        .active_network
        .as_deref()
        .map(|id| registry.resolve(id))
        .transpose()
        .context("Failed to resolve active network")?;

    // -- Start polling ---------------------------------------------------

    let legacy = if cfg.detection.legacy_mode {
        let poller = Arc::new(LegacyPoller::new(cycle.clone(), cfg.detection.interval(), active.clone()));
        poller.start();
        Some(poller)
    } else {
        None
    };

    let clients = ClientPoller::new(cycle.clone(), registry.clone(), cfg.detection.interval());
    for id in &cfg.detection.poll_network_clients {
        clients.start_polling_by_network_client_id(id)?;
    }

    let binder = Arc::new(EventBinder::new(cycle, legacy.clone(), active));
    let events = binder.bind(events_rx);

    info!(
        legacy = legacy.is_some(),
        clients = ?clients.active_network_clients(),
        "Polling started. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    if let Some(legacy) = &legacy {
        legacy.stop();
    }
    clients.stop_all_polling();
    drop(events_tx);
    events.abort();

    info!("TOKEN SENTRY stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("token_sentry=info"));

    let json_logging = std::env::var("TOKEN_SENTRY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
