//! # Coordinator Module
//!
//! Internal implementation of the call rate coordinator, split by concern.
//!
//! ## Module Structure
//!
//! ```text
//!     coordinator/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── clock.rs        (Injected time sources)
//!     ├── config.rs       (Registry bounds and throttle presets)
//!     ├── core.rs         (Registries, throttle and debounce policies)
//!     ├── error.rs        (Error type)
//!     ├── metrics.rs      (Stats snapshots)
//!     ├── presets.rs      (Notification throttles)
//!     ├── timer.rs        (Injected timer facility)
//!     └── wrappers.rs     (Throttled / Debounced call wrappers)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Call site
//!         │
//!         ▼
//!     ┌──────────┐
//!     │ Wrappers │ ◄── Throttled / Debounced / presets
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │   Core   │ ◄── Keyed registries, admission, timers
//!     └────┬─────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//!   Clock      Timer     ◄── Injected: real or simulated
//! ```

mod clock;
mod config;
mod core;
mod error;
mod metrics;
pub mod presets;
mod timer;
mod wrappers;

/// Time sources
pub use clock::{current_time_ms, Clock, ManualClock, SystemClock, TokioClock};

/// Configuration and presets
pub use config::{
    CoordinatorConfig, ThrottlePreset, DEFAULT_MAX_TRACKED_KEYS, EVICTION_TARGET_PERCENT,
};

/// The coordinator and its process-wide instance
pub use core::{global, CallRateCoordinator};

/// Errors
pub use error::CoordinatorError;

/// Diagnostics
pub use metrics::{CoordinatorStats, DebounceEntryStats, ThrottleEntryStats};

/// Timer facility
pub use timer::{Scheduler, TimerHandle, TimerTask, TokioScheduler};

/// Call wrappers
pub use wrappers::{Debounced, Throttled};
