//! # Coordinator Configuration
//!
//! Settings that bound the coordinator's memory use, plus the
//! [`ThrottlePreset`] type used to pin a key to a fixed interval.
//!
//! ## Bounded Registries
//!
//! Keys are created lazily and live until removed. With a small fixed set of
//! operation names that is harmless; with keys derived from user input it is
//! unbounded growth. The coordinator therefore caps each registry:
//!
//! ```text
//!     Registry size over time:
//!
//!     max_tracked_keys ─────────────────────────────  cap
//!                          ╱│         ╱│
//!                         ╱ │        ╱ │
//!     eviction target ───╱──┼───────╱──┼───────────  70% of cap
//!                       ╱   │ evict╱   │ evict
//!                      ╱    ╰─────╱    ╰────
//! ```
//!
//! Only entries whose removal cannot change any later decision are evicted:
//! throttle keys that are idle *and* past their interval, and debounce keys
//! with nothing pending.

use super::error::CoordinatorError;
use std::time::Duration;

/// Default cap on the number of keys tracked per registry.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Percentage of the cap that an eviction pass tries to get back down to.
pub const EVICTION_TARGET_PERCENT: usize = 70;

/// Configuration for a [`CallRateCoordinator`](crate::CallRateCoordinator).
///
/// ## Examples
///
/// ```rust
/// use callrate::CoordinatorConfig;
///
/// // Defaults: 10 000 keys, 5 minute idle eviction, cleanup every minute
/// let config = CoordinatorConfig::default();
/// assert!(config.validate().is_ok());
///
/// // A tighter bound for per-user keys
/// let config = CoordinatorConfig::new(1_000)
///     .with_idle_eviction_ms(60_000)
///     .with_cleanup_interval_ms(10_000);
/// assert_eq!(config.eviction_target(), 700);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Maximum number of keys per registry before eviction kicks in.
    pub max_tracked_keys: usize,

    /// How long an entry must sit idle before `cleanup()` removes it.
    ///
    /// Throttle entries are additionally required to be past their own
    /// interval, so this never shortens a throttle window.
    pub idle_eviction_ms: u64,

    /// Period of the background cleanup task.
    pub cleanup_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            idle_eviction_ms: 300_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a configuration with the given key cap and default timings.
    pub fn new(max_tracked_keys: usize) -> Self {
        Self {
            max_tracked_keys,
            ..Self::default()
        }
    }

    /// Sets the idle duration after which `cleanup()` may remove an entry.
    pub fn with_idle_eviction_ms(mut self, ms: u64) -> Self {
        self.idle_eviction_ms = ms;
        self
    }

    /// Sets the period of the background cleanup task.
    pub fn with_cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.cleanup_interval_ms = ms;
        self
    }

    /// Number of keys an eviction pass tries to shrink a registry to.
    pub fn eviction_target(&self) -> usize {
        (self.max_tracked_keys * EVICTION_TARGET_PERCENT) / 100
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConfig`] if:
    /// - `max_tracked_keys` is 0
    /// - `cleanup_interval_ms` is 0
    ///
    /// ```rust
    /// use callrate::CoordinatorConfig;
    ///
    /// assert!(CoordinatorConfig::new(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.max_tracked_keys == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "max_tracked_keys must be greater than 0",
            ));
        }

        if self.cleanup_interval_ms == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "cleanup_interval_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// A throttle key pinned to a fixed minimum interval.
///
/// Every call site that goes through the same preset shares one throttle
/// entry, so the key can never be used with two different intervals by
/// accident.
///
/// ```rust
/// use callrate::ThrottlePreset;
/// use std::time::Duration;
///
/// const SYNC_PROFILE: ThrottlePreset = ThrottlePreset::new("syncProfile", 30_000);
/// assert_eq!(SYNC_PROFILE.min_interval(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThrottlePreset {
    /// Key shared by every call site using this preset.
    pub key: &'static str,

    /// Minimum milliseconds between admitted calls.
    pub min_interval_ms: u64,
}

impl ThrottlePreset {
    /// Creates a preset.
    pub const fn new(key: &'static str, min_interval_ms: u64) -> Self {
        Self {
            key,
            min_interval_ms,
        }
    }

    /// The interval as a [`Duration`].
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
