//! Detection engine: gate, cycle, merger, schedulers and event binding.

pub mod gate;
pub mod merger;
pub mod cycle;
pub mod scheduler;
pub mod events;

pub use cycle::{CycleOutcome, CycleReport, DetectionCycle, SkipReason};
pub use events::{EventBinder, WalletEvent};
pub use gate::{ActivationGate, GateClosed};
pub use merger::ResultMerger;
pub use scheduler::{ClientPoller, LegacyPoller, PollingLoop, DEFAULT_INTERVAL, MIN_INTERVAL};
