//! Poll schedulers: periodic triggers into the detection cycle.
//!
//! Two independent strategies share one [`DetectionCycle`]:
//! - [`LegacyPoller`]: a single loop following whichever chain is active.
//!   The first tick lands one full interval after `start`.
//! - [`ClientPoller`]: one loop per network client id, each bound to the
//!   context resolved when the loop started. Fires immediately, then every
//!   interval.
//!
//! Each tick spawns the cycle on its own task, so stopping a loop only
//! prevents future ticks and never aborts a cycle already in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::cycle::DetectionCycle;
use crate::sources::NetworkClientResolver;
use crate::types::{ChainContext, DetectError};

/// Default polling period (3 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(180_000);

/// Shortest period a loop accepts. Shorter requests are raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            "Polling interval below minimum, using {}ms",
            MIN_INTERVAL.as_millis()
        );
        return MIN_INTERVAL;
    }
    interval
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

/// A running timer task. Dropping the loop aborts the timer.
#[derive(Debug)]
pub struct PollingLoop {
    pub id: Uuid,
    pub interval: Duration,
    timer: JoinHandle<()>,
}

impl PollingLoop {
    /// Arm a repeating timer that calls `target` on every tick and, when it
    /// yields a context, spawns a detection cycle for it.
    fn arm<F>(cycle: Arc<DetectionCycle>, interval: Duration, fire_immediately: bool, target: F) -> Self
    where
        F: Fn() -> Option<ChainContext> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let first = if fire_immediately {
            Instant::now()
        } else {
            Instant::now() + interval
        };

        let timer = tokio::spawn(async move {
            let mut ticker = interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match target() {
                    Some(context) => {
                        debug!(loop_id = %id, context = %context.key(), "Polling tick");
                        cycle.spawn_run(context);
                    }
                    None => debug!(loop_id = %id, "Polling tick without an active chain"),
                }
            }
        });

        Self { id, interval, timer }
    }

    pub fn is_active(&self) -> bool {
        !self.timer.is_finished()
    }

    fn cancel(&self) {
        self.timer.abort();
    }
}

impl Drop for PollingLoop {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

// ---------------------------------------------------------------------------
// Legacy mode
// ---------------------------------------------------------------------------

/// Single loop tied to the currently active chain.
pub struct LegacyPoller {
    cycle: Arc<DetectionCycle>,
    interval: Duration,
    target: Arc<RwLock<Option<ChainContext>>>,
    timer: Mutex<Option<PollingLoop>>,
}

impl LegacyPoller {
    /// `interval` below [`MIN_INTERVAL`] is raised to it.
    pub fn new(cycle: Arc<DetectionCycle>, interval: Duration, active: Option<ChainContext>) -> Self {
        Self {
            cycle,
            interval: clamp_interval(interval),
            target: Arc::new(RwLock::new(active)),
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer. Re-arms (new phase) if it was already running.
    pub fn start(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.take() {
            old.cancel();
        }

        let target = Arc::clone(&self.target);
        let next = PollingLoop::arm(Arc::clone(&self.cycle), self.interval, false, move || {
            target.read().unwrap_or_else(|p| p.into_inner()).clone()
        });
        info!(
            loop_id = %next.id,
            interval_ms = self.interval.as_millis() as u64,
            "Legacy detection polling started"
        );
        *slot = Some(next);
    }

    pub fn stop(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.take() {
            old.cancel();
            info!(loop_id = %old.id, "Legacy detection polling stopped");
        }
    }

    /// Detect now and restart the timer phase from this moment.
    pub fn restart(&self) -> Option<JoinHandle<()>> {
        self.start();
        self.trigger_now()
    }

    /// Point future ticks at a new chain. The timer phase is untouched.
    pub fn retarget(&self, context: ChainContext) {
        info!(context = %context.key(), "Legacy detection retargeted");
        *self.target.write().unwrap_or_else(|p| p.into_inner()) = Some(context);
    }

    pub fn current_context(&self) -> Option<ChainContext> {
        self.target.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Spawn a cycle for the current chain immediately, outside the timer.
    pub fn trigger_now(&self) -> Option<JoinHandle<()>> {
        self.current_context().map(|ctx| self.cycle.spawn_run(ctx))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(PollingLoop::is_active)
    }
}

// ---------------------------------------------------------------------------
// Per-network-client mode
// ---------------------------------------------------------------------------

struct ClientLoop {
    context: ChainContext,
    timer: PollingLoop,
}

/// One loop per network client id.
pub struct ClientPoller {
    cycle: Arc<DetectionCycle>,
    resolver: Arc<dyn NetworkClientResolver>,
    interval: Duration,
    loops: Mutex<HashMap<String, ClientLoop>>,
}

impl ClientPoller {
    /// `interval` below [`MIN_INTERVAL`] is raised to it.
    pub fn new(cycle: Arc<DetectionCycle>, resolver: Arc<dyn NetworkClientResolver>, interval: Duration) -> Self {
        Self {
            cycle,
            resolver,
            interval: clamp_interval(interval),
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or keep) polling for `network_client_id`.
    ///
    /// The id is resolved once here; a changed resolution needs a stop and
    /// start to take effect.
    pub fn start_polling_by_network_client_id(&self, network_client_id: &str) -> Result<(), DetectError> {
        let mut loops = self.loops.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(existing) = loops.get(network_client_id) {
            if existing.timer.is_active() {
                debug!(network_client_id, "Polling already active, reusing loop");
                return Ok(());
            }
        }

        let context = self
            .resolver
            .resolve(network_client_id)
            .map_err(|e| {
                debug!(network_client_id, error = %e, "Network client resolution failed");
                DetectError::UnknownNetworkClient(network_client_id.to_string())
            })?;

        if let Some(stale) = loops.remove(network_client_id) {
            stale.timer.cancel();
        }

        let tick_context = context.clone();
        let timer = PollingLoop::arm(Arc::clone(&self.cycle), self.interval, true, move || {
            Some(tick_context.clone())
        });

        info!(
            network_client_id,
            chain_id = %context.chain_id,
            loop_id = %timer.id,
            interval_ms = self.interval.as_millis() as u64,
            "Per-client detection polling started"
        );
        loops.insert(network_client_id.to_string(), ClientLoop { context, timer });
        Ok(())
    }

    /// Stop the loop for `network_client_id`. Returns whether one existed.
    pub fn stop_polling_by_network_client_id(&self, network_client_id: &str) -> bool {
        let removed = self
            .loops
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(network_client_id);

        match removed {
            Some(client_loop) => {
                client_loop.timer.cancel();
                info!(network_client_id, "Per-client detection polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all_polling(&self) {
        let drained: Vec<(String, ClientLoop)> = self
            .loops
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .collect();

        for (network_client_id, client_loop) in drained {
            client_loop.timer.cancel();
            debug!(network_client_id = %network_client_id, "Per-client detection polling stopped");
        }
    }

    /// Ids with a live polling loop, sorted.
    pub fn active_network_clients(&self) -> Vec<String> {
        let loops = self.loops.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<String> = loops
            .iter()
            .filter(|(_, l)| l.timer.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The context a loop was started with.
    pub fn context_for(&self, network_client_id: &str) -> Option<ChainContext> {
        self.loops
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(network_client_id)
            .map(|l| l.context.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
