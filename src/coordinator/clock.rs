//! # Time Sources (clock.rs)
//!
//! Every admission decision the coordinator makes is a comparison between
//! "now" and the last admitted call. Where "now" comes from is injected
//! through the [`Clock`] trait, so production code reads a monotonic wall
//! clock while tests drive time explicitly.
//!
//! ```text
//!     Available clocks:
//!
//!     SystemClock ──► epoch ms captured once, advanced by std Instant
//!        │            (immune to wall-clock jumps)
//!        │
//!     TokioClock ───► epoch ms captured once, advanced by tokio Instant
//!        │            (follows tokio::time::pause / advance)
//!        │
//!     ManualClock ──► an atomic counter you move yourself
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// Wall-clock epoch milliseconds captured at first use, advanced with a
// monotonic Instant afterwards.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Returns the current time in milliseconds since UNIX epoch.
///
/// The value never goes backwards within a process, even if the system
/// clock is adjusted.
///
/// # Example
///
/// ```rust
/// use callrate::current_time_ms;
///
/// let a = current_time_ms();
/// let b = current_time_ms();
/// assert!(b >= a);
/// ```
#[inline]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| (Instant::now(), epoch_ms()));
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

/// A source of "now" in milliseconds since UNIX epoch.
///
/// Implementations must be monotonic: two successive reads never go
/// backwards.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock backed by [`current_time_ms`].
///
/// This is the clock used by [`CallRateCoordinator::new`](crate::CallRateCoordinator::new).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Clock that follows tokio's notion of time.
///
/// Under `#[tokio::test(start_paused = true)]` or after
/// `tokio::time::pause()`, this clock only moves when tokio's clock moves,
/// which keeps throttle timing and debounce timers on the same timeline.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    start: tokio::time::Instant,
    base_ms: u64,
}

impl TokioClock {
    /// Creates a clock anchored at the current tokio instant.
    ///
    /// Create it inside the runtime whose clock it should follow.
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
            base_ms: epoch_ms(),
        }
    }

    /// Milliseconds since this clock was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.base_ms.saturating_add(self.elapsed_ms())
    }
}

/// Clock that only moves when told to.
///
/// Useful for synchronous tests of admission logic (`can_call`,
/// `run_throttled_sync`) where no timers are involved.
///
/// ```rust
/// use callrate::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }

    /// Sets the clock to `ms`. Callers are responsible for keeping it monotonic.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
