//! # Diagnostics
//!
//! Suppression never reaches callers as an error, so
//! the only place it becomes visible is here (and in the `tracing` output).
//! [`CoordinatorStats`] is a point-in-time snapshot; taking it mutates
//! nothing.
//!
//! ```text
//!     Coordinator Stats:
//!     ├─ Throttle keys: 3 (1 in flight)
//!     │  ├─ Admitted: 42
//!     │  └─ Suppressed: 117 (73.58%)
//!     ├─ Debounce keys: 2 (1 pending)
//!     │  ├─ Scheduled: 30
//!     │  ├─ Superseded: 27
//!     │  ├─ Fired: 2
//!     │  └─ Cancelled: 0
//!     └─ Evicted: 0
//! ```

use std::fmt;

/// Snapshot of a single throttle key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleEntryStats {
    /// The throttle key.
    pub key: String,

    /// Time of the last admitted call, `None` if never admitted (or reset).
    pub last_invocation_ms: Option<u64>,

    /// Whether an admitted operation is still running.
    pub in_flight: bool,

    /// Milliseconds since the last admitted call.
    pub elapsed_ms: Option<u64>,

    /// How long the current flight has been running.
    pub in_flight_ms: Option<u64>,
}

/// Snapshot of a single debounce key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceEntryStats {
    /// The debounce key.
    pub key: String,

    /// Whether a timer is waiting to fire.
    pub pending: bool,
}

/// Point-in-time view of a coordinator.
///
/// ## Example
///
/// ```rust
/// use callrate::CallRateCoordinator;
///
/// let coordinator = CallRateCoordinator::new();
/// coordinator.run_throttled_sync("refresh", std::time::Duration::from_secs(1), || ());
/// coordinator.run_throttled_sync("refresh", std::time::Duration::from_secs(1), || ());
///
/// let stats = coordinator.get_stats();
/// assert_eq!(stats.total_admitted, 1);
/// assert_eq!(stats.total_suppressed, 1);
/// println!("{}", stats);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorStats {
    /// Every registered throttle key, sorted by key.
    pub throttles: Vec<ThrottleEntryStats>,

    /// Every registered debounce key, sorted by key.
    pub debounces: Vec<DebounceEntryStats>,

    /// Number of debounce timers currently pending.
    pub pending_debounce_timers: usize,

    /// Throttle calls admitted since startup.
    pub total_admitted: u64,

    /// Throttle calls suppressed since startup.
    pub total_suppressed: u64,

    /// Debounce timers scheduled since startup.
    pub total_debounce_scheduled: u64,

    /// Debounce timers replaced by a newer call before firing.
    pub total_debounce_superseded: u64,

    /// Debounced operations actually executed.
    pub total_debounce_fired: u64,

    /// Debounce timers cancelled by `cancel_debounce` or `clear_all`.
    pub total_debounce_cancelled: u64,

    /// Entries removed by capacity eviction or `cleanup()`.
    pub total_evicted: u64,
}

impl CoordinatorStats {
    /// Looks up the snapshot for one throttle key.
    pub fn throttle(&self, key: &str) -> Option<&ThrottleEntryStats> {
        self.throttles.iter().find(|entry| entry.key == key)
    }

    /// Fraction of throttle calls that were suppressed (0.0 to 1.0).
    pub fn suppression_rate(&self) -> f64 {
        let total = self.total_admitted + self.total_suppressed;
        if total == 0 {
            0.0
        } else {
            self.total_suppressed as f64 / total as f64
        }
    }

    /// Number of throttle keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.throttles.iter().filter(|entry| entry.in_flight).count()
    }

    /// Keys whose operation has been in flight for at least `threshold_ms`.
    ///
    /// An operation that never settles blocks its key until
    /// `reset_throttle`; this is how such keys are found.
    pub fn stuck_in_flight(&self, threshold_ms: u64) -> Vec<&str> {
        self.throttles
            .iter()
            .filter(|entry| entry.in_flight_ms.is_some_and(|ms| ms >= threshold_ms))
            .map(|entry| entry.key.as_str())
            .collect()
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        format!(
            "Coordinator Stats:\n\
             ├─ Throttle keys: {} ({} in flight)\n\
             │  ├─ Admitted: {}\n\
             │  └─ Suppressed: {} ({:.2}%)\n\
             ├─ Debounce keys: {} ({} pending)\n\
             │  ├─ Scheduled: {}\n\
             │  ├─ Superseded: {}\n\
             │  ├─ Fired: {}\n\
             │  └─ Cancelled: {}\n\
             └─ Evicted: {}",
            self.throttles.len(),
            self.in_flight_count(),
            self.total_admitted,
            self.total_suppressed,
            self.suppression_rate() * 100.0,
            self.debounces.len(),
            self.pending_debounce_timers,
            self.total_debounce_scheduled,
            self.total_debounce_superseded,
            self.total_debounce_fired,
            self.total_debounce_cancelled,
            self.total_evicted,
        )
    }
}

impl fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
