//! # Callrate - Keyed Throttle and Debounce Coordination
//!
//! A small coordinator that keeps chatty call sites from hammering a
//! downstream API. Every logical operation gets a string key, and each key
//! follows one of two policies:
//!
//! - **Throttle**: at most one admitted call per minimum interval, and never
//!   two overlapping calls. Calls made too soon are *suppressed*: they
//!   return `None` without running.
//! - **Debounce**: wait for a quiet period, then run once with the most
//!   recent arguments. Earlier calls in the burst never run.
//!
//! ```text
//!     Throttle (interval 1000ms):
//!
//!     calls:     │●     ●     ●        ●      ●    │
//!     time(ms):  0     300   700      1200   1500
//!     admitted:  ✅     ❌    ❌        ✅     ❌
//!
//!     Debounce (delay 300ms):
//!
//!     calls:     │A  B  C                          │
//!     time(ms):  0  100 200        500
//!     runs:                        op(C)
//! ```
//!
//! ## Quick Start
//!
//! ### Throttling
//!
//! ```rust
//! use callrate::CallRateCoordinator;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = CallRateCoordinator::new();
//!
//! let fetch_notifications = coordinator.throttle(
//!     |page: u32| async move { Ok::<_, String>(vec![page]) },
//!     Duration::from_secs(15),
//!     "fetchNotifications",
//! );
//!
//! match fetch_notifications.call(1).await {
//!     Some(Ok(items)) => println!("got {} items", items.len()),
//!     Some(Err(err)) => eprintln!("request failed: {err}"),
//!     None => println!("suppressed, showing cached list"),
//! }
//! # }
//! ```
//!
//! ### Debouncing
//!
//! ```rust
//! use callrate::CallRateCoordinator;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = CallRateCoordinator::new();
//!
//! let search = coordinator.debounce(
//!     |query: String| async move { println!("searching for {query}") },
//!     Duration::from_millis(300),
//!     "search",
//! );
//!
//! for query in ["n", "na", "nag", "nagari"] {
//!     search.call(query.to_string());
//! }
//! // Only "nagari" is searched, 300ms after the last keystroke
//! # }
//! ```
//!
//! ### Pre-check without calling
//!
//! ```rust
//! use callrate::CallRateCoordinator;
//! use std::time::Duration;
//!
//! let coordinator = CallRateCoordinator::new();
//! if coordinator.can_call("fetchUnreadCount", Duration::from_secs(10)) {
//!     // worth showing a spinner
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │  CallRateCoordinator    │
//!                    ├─────────────────────────┤
//!                    │  • throttle / debounce  │
//!                    │  • can_call             │
//!                    │  • reset / cancel       │
//!                    │  • get_stats / clear    │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │  Throttle registry  │       │  Debounce registry   │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • last admission    │       │ • pending timer      │
//!     │ • in-flight guard   │       │ • last arguments     │
//!     └──────────┬──────────┘       └───────────┬──────────┘
//!                │                              │
//!            Clock (injected)          Scheduler (injected)
//! ```
//!
//! ## Testing With Simulated Time
//!
//! Time and timers are injected. Under
//! `#[tokio::test(start_paused = true)]`, a coordinator built with
//! [`TokioClock`] runs throttle windows and debounce timers on tokio's
//! paused clock, so tests never sleep for real. For purely synchronous
//! checks, [`ManualClock`] is simpler.
//!
//! ## Thread Safety
//!
//! [`CallRateCoordinator`] is `Clone + Send + Sync`; clones share state.
//! Admission is decided under a per-key shard lock, so concurrent callers
//! on a multi-threaded runtime get the same guarantees as a single task.
//!
//! ## Logging
//!
//! Admissions, suppressions and timer events are emitted through
//! [`tracing`] at `debug` level; resets, clears and capacity events at
//! `info`/`warn`. Install a subscriber in your application to see them.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod coordinator;

// Public re-exports
pub use coordinator::{
    current_time_ms, global, presets, CallRateCoordinator, Clock, CoordinatorConfig,
    CoordinatorError, CoordinatorStats, DebounceEntryStats, Debounced, ManualClock, Scheduler,
    SystemClock, ThrottleEntryStats, ThrottlePreset, Throttled, TimerHandle, TimerTask,
    TokioClock, TokioScheduler, DEFAULT_MAX_TRACKED_KEYS, EVICTION_TARGET_PERCENT,
};

use std::sync::Arc;

/// A coordinator wrapped in `Arc`.
///
/// The coordinator is already cheap to clone; this alias is for code that
/// stores shared services behind `Arc` uniformly.
pub type SharedCoordinator = Arc<CallRateCoordinator>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use callrate::prelude::*;
///
/// let coordinator = CallRateCoordinator::new();
/// let _stats: CoordinatorStats = coordinator.get_stats();
/// ```
pub mod prelude {
    //! Common imports for typical throttling and debouncing.

    pub use crate::presets::NotificationThrottles;
    pub use crate::{
        global, CallRateCoordinator, CoordinatorBuilder, CoordinatorConfig, CoordinatorError,
        CoordinatorStats, Debounced, ThrottlePreset, Throttled,
    };
}

/// Builder for coordinators with a custom configuration, clock or
/// scheduler.
///
/// # Example
///
/// ```rust
/// use callrate::{CoordinatorBuilder, ManualClock};
/// use std::sync::Arc;
///
/// let coordinator = CoordinatorBuilder::new()
///     .max_tracked_keys(500)
///     .idle_eviction_ms(60_000)
///     .clock(Arc::new(ManualClock::new(0)))
///     .build();
///
/// assert_eq!(coordinator.config().max_tracked_keys, 500);
///
/// // Or use try_build() for error handling
/// let result = CoordinatorBuilder::new().max_tracked_keys(0).try_build();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl CoordinatorBuilder {
    /// Creates a builder with the default configuration, the system clock
    /// and the tokio scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Caps the number of keys per registry.
    pub fn max_tracked_keys(mut self, max: usize) -> Self {
        self.config.max_tracked_keys = max;
        self
    }

    /// Sets how long an entry must be idle before cleanup may remove it.
    pub fn idle_eviction_ms(mut self, ms: u64) -> Self {
        self.config.idle_eviction_ms = ms;
        self
    }

    /// Sets the period of the background cleanup task.
    pub fn cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.config.cleanup_interval_ms = ms;
        self
    }

    /// Uses `clock` as the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `scheduler` for debounce timers.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the coordinator.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. Use
    /// [`try_build`](Self::try_build) to handle that instead.
    pub fn build(self) -> CallRateCoordinator {
        match self.try_build() {
            Ok(coordinator) => coordinator,
            Err(err) => panic!("{err}"),
        }
    }

    /// Builds the coordinator, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConfig`] if validation fails.
    pub fn try_build(self) -> Result<CallRateCoordinator, CoordinatorError> {
        self.config.validate()?;

        Ok(CallRateCoordinator::with_parts(
            self.config,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let coordinator = CoordinatorBuilder::new().build();
        assert_eq!(coordinator.config(), &CoordinatorConfig::default());
    }

    #[test]
    fn test_builder_chain() {
        let clock = Arc::new(ManualClock::new(42));
        let coordinator = CoordinatorBuilder::new()
            .max_tracked_keys(10)
            .idle_eviction_ms(1_000)
            .cleanup_interval_ms(500)
            .clock(clock.clone())
            .build();

        assert_eq!(coordinator.config().max_tracked_keys, 10);
        assert_eq!(coordinator.config().idle_eviction_ms, 1_000);
        assert_eq!(coordinator.config().cleanup_interval_ms, 500);
        assert_eq!(coordinator.now_ms(), 42);
    }

    #[test]
    fn test_builder_validation() {
        let result = CoordinatorBuilder::new().cleanup_interval_ms(0).try_build();
        assert!(matches!(result, Err(CoordinatorError::InvalidConfig(_))));
    }

    #[test]
    #[should_panic(expected = "max_tracked_keys must be greater than 0")]
    fn test_builder_panics_on_invalid_config() {
        let _ = CoordinatorBuilder::new().max_tracked_keys(0).build();
    }

    #[test]
    fn test_builder_config_replaces_all() {
        let config = CoordinatorConfig::new(3).with_idle_eviction_ms(7);
        let coordinator = CoordinatorBuilder::new().config(config.clone()).build();
        assert_eq!(coordinator.config(), &config);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let coordinator = CallRateCoordinator::new();
        let _throttles = NotificationThrottles::new(coordinator.clone());
        let _stats: CoordinatorStats = coordinator.get_stats();
        let _preset = ThrottlePreset::new("k", 1);
    }

    #[test]
    fn test_shared_coordinator() {
        let shared: SharedCoordinator = Arc::new(CallRateCoordinator::new());
        let clone = shared.clone();

        assert_eq!(clone.run_throttled_sync("k", Duration::from_secs(60), || 1), Some(1));
        assert!(!shared.can_call("k", Duration::from_secs(60)));
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(DEFAULT_MAX_TRACKED_KEYS, 10_000);
    }
}
