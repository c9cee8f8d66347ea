//! # Call Rate Coordinator
//!
//! The coordinator keeps two keyed registries and applies one policy to each:
//!
//! ```text
//!     throttle("fetchNotifications", 15s)      debounce("draft", 300ms)
//!              │                                        │
//!              ▼                                        ▼
//!     ┌─────────────────────┐                 ┌─────────────────────┐
//!     │ throttle registry   │                 │ debounce registry   │
//!     │  key → last call    │                 │  key → pending timer│
//!     │        in flight?   │                 │        last args    │
//!     └─────────┬───────────┘                 └─────────┬───────────┘
//!               │                                       │
//!      admitted │ suppressed                  new call  │ timer fires
//!               ▼      ▼                      cancels ◄─┤      ▼
//!          run op   return None               previous  │  run op(last args)
//! ```
//!
//! ## Throttle Admission
//!
//! ```text
//!     t=0     call ──► admitted  (never called before)
//!     t=500   call ──► suppressed (500 < 1000)
//!     t=1001  call ──► admitted  (1001 ≥ 1000, not in flight)
//! ```
//!
//! A call is admitted iff the interval since the last *admitted* call has
//! elapsed **and** no admitted call under the same key is still running.
//! The check and the bookkeeping happen under the key's shard lock, so two
//! threads racing on one key cannot both be admitted.
//!
//! ## Debounce Collapse
//!
//! ```text
//!     t=0    call(A) ──► timer@300
//!     t=100  call(B) ──► cancel timer@300, timer@400
//!     t=200  call(C) ──► cancel timer@400, timer@500
//!     t=500  ─────────► op(C)
//! ```
//!
//! ## Memory
//!
//! Both registries are bounded by
//! [`CoordinatorConfig::max_tracked_keys`]. Eviction only removes entries
//! whose absence is unobservable; see [`CallRateCoordinator::cleanup`].

use super::{
    clock::{Clock, SystemClock},
    config::CoordinatorConfig,
    error::CoordinatorError,
    metrics::{CoordinatorStats, DebounceEntryStats, ThrottleEntryStats},
    timer::{Scheduler, TimerHandle, TimerTask, TokioScheduler},
    wrappers::{Debounced, Throttled},
};
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Share of the key cap above which the cleanup task logs a warning.
const HIGH_USAGE_PERCENT: usize = 90;

type Registry<V> = DashMap<String, V, ahash::RandomState>;

/// Lets one eviction routine serve both registries.
trait Evictable {
    fn last_access_ms(&self) -> u64;

    /// True if removing the entry cannot change any later decision.
    fn is_evictable(&self, now_ms: u64) -> bool;
}

#[derive(Debug)]
struct ThrottleEntry {
    last_invocation_ms: Option<u64>,
    in_flight: bool,
    in_flight_since_ms: Option<u64>,
    /// Longest interval any caller has checked this key against.
    longest_interval_ms: u64,
    /// Identifies the current flight so a stale completion is ignored.
    flight_id: u64,
    last_access_ms: u64,
}

impl ThrottleEntry {
    fn new(now_ms: u64) -> Self {
        Self {
            last_invocation_ms: None,
            in_flight: false,
            in_flight_since_ms: None,
            longest_interval_ms: 0,
            flight_id: 0,
            last_access_ms: now_ms,
        }
    }

    #[inline]
    fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_invocation_ms
            .map(|last| now_ms.saturating_sub(last))
    }

    #[inline]
    fn admits(&self, now_ms: u64, min_interval_ms: u64) -> bool {
        !self.in_flight
            && self
                .elapsed_ms(now_ms)
                .map_or(true, |elapsed| elapsed >= min_interval_ms)
    }

    fn snapshot(&self, key: &str, now_ms: u64) -> ThrottleEntryStats {
        ThrottleEntryStats {
            key: key.to_string(),
            last_invocation_ms: self.last_invocation_ms,
            in_flight: self.in_flight,
            elapsed_ms: self.elapsed_ms(now_ms),
            in_flight_ms: self
                .in_flight_since_ms
                .map(|since| now_ms.saturating_sub(since)),
        }
    }
}

impl Evictable for ThrottleEntry {
    fn last_access_ms(&self) -> u64 {
        self.last_access_ms
    }

    fn is_evictable(&self, now_ms: u64) -> bool {
        // A fresh entry would admit the next call under every interval seen
        // so far; so does this one.
        self.admits(now_ms, self.longest_interval_ms)
    }
}

struct DebounceEntry {
    /// Generation of the call whose arguments are waiting to run.
    armed: Option<u64>,
    /// Timer for the armed generation, once the scheduler has returned it.
    pending: Option<TimerHandle>,
    /// Behind a mutex so arguments only need to be `Send`.
    last_args: Mutex<Option<Box<dyn Any + Send>>>,
    last_access_ms: u64,
}

impl DebounceEntry {
    fn new(now_ms: u64) -> Self {
        Self {
            armed: None,
            pending: None,
            last_args: Mutex::new(None),
            last_access_ms: now_ms,
        }
    }

    fn args_mut(&mut self) -> &mut Option<Box<dyn Any + Send>> {
        self.last_args
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Evictable for DebounceEntry {
    fn last_access_ms(&self) -> u64 {
        self.last_access_ms
    }

    fn is_evictable(&self, _now_ms: u64) -> bool {
        self.armed.is_none()
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    suppressed: AtomicU64,
    debounce_scheduled: AtomicU64,
    debounce_superseded: AtomicU64,
    debounce_fired: AtomicU64,
    debounce_cancelled: AtomicU64,
    evicted: AtomicU64,
    /// Source of flight ids and timer generations.
    next_id: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Marks an admitted throttle call as settled when dropped.
///
/// Dropping covers every way a call can end: normal return, error result,
/// panic unwinding through the operation, or the caller dropping the
/// future before completion.
pub(crate) struct FlightGuard {
    throttles: Arc<Registry<ThrottleEntry>>,
    key: String,
    flight_id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(mut entry) = self.throttles.get_mut(&self.key) {
            // A reset or clear may have started a newer flight under this key.
            if entry.in_flight && entry.flight_id == self.flight_id {
                entry.in_flight = false;
                entry.in_flight_since_ms = None;
            }
        }
    }
}

/// Keyed throttle and debounce coordinator.
///
/// Cloning is cheap and every clone shares the same registries, so a
/// coordinator can be handed to many tasks or stored in application state.
///
/// ## Usage Patterns
///
/// ### Throttling an async call
///
/// ```rust
/// use callrate::CallRateCoordinator;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = CallRateCoordinator::new();
/// let fetch = coordinator.throttle(
///     |page: u32| async move { format!("page {page}") },
///     Duration::from_secs(15),
///     "fetchNotifications",
/// );
///
/// assert_eq!(fetch.call(1).await.as_deref(), Some("page 1"));
/// // Too soon: suppressed without running the operation
/// assert_eq!(fetch.call(2).await, None);
/// # }
/// ```
///
/// ### Debouncing a save
///
/// ```rust
/// use callrate::CallRateCoordinator;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = CallRateCoordinator::new();
/// let save = coordinator.debounce(
///     |draft: String| async move { println!("saving {draft}") },
///     Duration::from_millis(300),
///     "draft",
/// );
///
/// save.call("h".to_string());
/// save.call("he".to_string());
/// save.call("hello".to_string()); // only this one is saved
/// # }
/// ```
///
/// ## Timeouts
///
/// The coordinator imposes none. An operation that never settles keeps its
/// key in flight, and every later call is suppressed until
/// [`reset_throttle`](Self::reset_throttle). Wrap operations in
/// `tokio::time::timeout` before throttling them if that matters;
/// [`CoordinatorStats::stuck_in_flight`] finds keys in that state.
#[derive(Clone)]
pub struct CallRateCoordinator {
    throttles: Arc<Registry<ThrottleEntry>>,
    debounces: Arc<Registry<DebounceEntry>>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    config: CoordinatorConfig,
    counters: Arc<Counters>,
}

impl CallRateCoordinator {
    /// Creates a coordinator with the default configuration, the system
    /// clock, and the tokio scheduler.
    pub fn new() -> Self {
        Self::with_parts(
            CoordinatorConfig::default(),
            Arc::new(SystemClock),
            Arc::new(TokioScheduler),
        )
    }

    /// Creates a coordinator reading time from `clock`.
    ///
    /// ```rust
    /// use callrate::{CallRateCoordinator, ManualClock};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::new(0));
    /// let coordinator = CallRateCoordinator::with_clock(clock.clone());
    /// let second = Duration::from_secs(1);
    ///
    /// assert_eq!(coordinator.run_throttled_sync("k", second, || 1), Some(1));
    /// assert_eq!(coordinator.run_throttled_sync("k", second, || 2), None);
    ///
    /// clock.advance(1_000);
    /// assert_eq!(coordinator.run_throttled_sync("k", second, || 3), Some(3));
    /// ```
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(CoordinatorConfig::default(), clock, Arc::new(TokioScheduler))
    }

    /// Creates a coordinator from explicit parts.
    ///
    /// The configuration is not validated here; use
    /// [`CoordinatorBuilder::try_build`](crate::CoordinatorBuilder::try_build)
    /// for that.
    pub fn with_parts(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            throttles: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            debounces: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            clock,
            scheduler,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The configuration this coordinator was built with.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current time according to the injected clock.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------
    // Throttle
    // ------------------------------------------------------------------

    /// Wraps `op` so calls through the wrapper are throttled under `key`.
    ///
    /// Wrappers built with the same key share one throttle entry, whatever
    /// operation they wrap.
    ///
    /// Intervals are tracked in whole milliseconds. Anything shorter than
    /// one millisecond truncates to zero and admits every call that is not
    /// blocked by an in-flight one.
    pub fn throttle<F>(&self, op: F, min_interval: Duration, key: impl Into<String>) -> Throttled<F> {
        Throttled::new(self.clone(), op, min_interval, key.into())
    }

    /// Runs `op` if a throttled call under `key` is admitted now.
    ///
    /// Admission is decided when this method is called, not when the
    /// returned future is first polled. The future resolves to
    /// `Some(output)` when admitted and `None` when suppressed. Errors are
    /// part of the output and are never swallowed.
    ///
    /// Dropping the returned future before it completes drops the
    /// operation and ends the flight.
    pub fn run_throttled<F, Fut>(
        &self,
        key: &str,
        min_interval: Duration,
        op: F,
    ) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let admitted = self
            .try_admit(key, min_interval)
            .map(|guard| (guard, op()));

        async move {
            let (_guard, operation) = admitted?;
            Some(operation.await)
        }
    }

    /// Synchronous form of [`run_throttled`](Self::run_throttled).
    ///
    /// The key counts as in flight while `op` runs, and is released even if
    /// `op` panics.
    pub fn run_throttled_sync<F, T>(&self, key: &str, min_interval: Duration, op: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.try_admit(key, min_interval)?;
        Some(op())
    }

    /// Returns true iff a throttled call under `key` would be admitted now.
    ///
    /// An unknown key is not registered by asking about it, and no counter
    /// moves. For a known key the interval is remembered, so eviction never
    /// drops an entry this query would still see as blocked.
    ///
    /// As with [`throttle`](Self::throttle), sub-millisecond intervals
    /// count as zero.
    pub fn can_call(&self, key: &str, min_interval: Duration) -> bool {
        let now_ms = self.clock.now_ms();
        let min_interval_ms = duration_ms(min_interval);

        self.throttles.get_mut(key).map_or(true, |mut entry| {
            entry.longest_interval_ms = entry.longest_interval_ms.max(min_interval_ms);
            entry.admits(now_ms, min_interval_ms)
        })
    }

    /// Forgets the last admitted call and the in-flight flag for `key`.
    ///
    /// The next call under `key` is admitted regardless of prior timing. An
    /// operation still running from before the reset keeps running, but its
    /// completion no longer affects the key.
    pub fn reset_throttle(&self, key: &str) {
        if let Some(mut entry) = self.throttles.get_mut(key) {
            let was_in_flight = entry.in_flight;
            entry.last_invocation_ms = None;
            entry.in_flight = false;
            entry.in_flight_since_ms = None;
            entry.longest_interval_ms = 0;
            drop(entry);

            info!(key, was_in_flight, "Throttle state reset");
        }
    }

    pub(crate) fn try_admit(&self, key: &str, min_interval: Duration) -> Option<FlightGuard> {
        let min_interval_ms = duration_ms(min_interval);
        let now_ms = self.clock.now_ms();

        let decision = self.with_entry(
            &self.throttles,
            "throttle",
            key,
            now_ms,
            ThrottleEntry::new,
            |entry| {
                entry.last_access_ms = now_ms;
                entry.longest_interval_ms = entry.longest_interval_ms.max(min_interval_ms);

                if !entry.admits(now_ms, min_interval_ms) {
                    return Err((entry.in_flight, entry.elapsed_ms(now_ms)));
                }

                let flight_id = self.counters.next_id();
                entry.last_invocation_ms = Some(now_ms);
                entry.in_flight = true;
                entry.in_flight_since_ms = Some(now_ms);
                entry.flight_id = flight_id;
                Ok(flight_id)
            },
        );

        match decision {
            Ok(flight_id) => {
                Counters::bump(&self.counters.admitted);
                debug!(key, min_interval_ms, "Throttled call admitted");

                Some(FlightGuard {
                    throttles: Arc::clone(&self.throttles),
                    key: key.to_owned(),
                    flight_id,
                })
            }
            Err((in_flight, elapsed_ms)) => {
                Counters::bump(&self.counters.suppressed);
                debug!(
                    key,
                    in_flight,
                    elapsed_ms = ?elapsed_ms,
                    min_interval_ms,
                    "Throttled call suppressed"
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Debounce
    // ------------------------------------------------------------------

    /// Wraps `op` so calls through the wrapper are debounced under `key`.
    pub fn debounce<F>(&self, op: F, delay: Duration, key: impl Into<String>) -> Debounced<F> {
        Debounced::new(self.clone(), op, delay, key.into())
    }

    /// Schedules `op(args)` to run after `delay`, replacing anything pending
    /// under `key`.
    ///
    /// Fire-and-forget: the operation's outcome is not reported back. If the
    /// scheduler cannot take the timer (no tokio runtime), the call is
    /// dropped and logged.
    ///
    /// The scheduler and any timer cancellation run with no registry lock
    /// held, so a scheduler may run a zero-delay task inline.
    pub fn schedule_debounced<A, F, Fut>(&self, key: &str, delay: Duration, args: A, op: F)
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let now_ms = self.clock.now_ms();
        let generation = self.counters.next_id();

        let (superseded, previous) = self.with_entry(
            &self.debounces,
            "debounce",
            key,
            now_ms,
            DebounceEntry::new,
            |entry| {
                entry.last_access_ms = now_ms;
                *entry.args_mut() = Some(Box::new(args));
                let superseded = entry.armed.replace(generation).is_some();
                (superseded, entry.pending.take())
            },
        );

        if let Some(previous) = previous {
            previous.cancel();
        }
        if superseded {
            Counters::bump(&self.counters.debounce_superseded);
        }

        let task = self.fire_task(key.to_owned(), generation, op);
        match self.scheduler.schedule(delay, task) {
            Ok(handle) => {
                Counters::bump(&self.counters.debounce_scheduled);
                debug!(
                    key,
                    delay_ms = duration_ms(delay),
                    superseded,
                    "Debounce timer scheduled"
                );
                self.install_timer(key, generation, handle);
            }
            Err(err) => {
                if let Some(mut entry) = self.debounces.get_mut(key) {
                    if entry.armed == Some(generation) {
                        entry.armed = None;
                        *entry.args_mut() = None;
                    }
                }
                warn!(key, error = %err, "Debounced call dropped");
            }
        }
    }

    /// Records `handle` as the pending timer if `generation` is still armed.
    ///
    /// Otherwise the call was superseded, cancelled, cleared or has already
    /// fired while the scheduler held the task. The handle is dropped
    /// without cancelling: a stale timer finds its generation gone and
    /// exits, and a fired operation must not be interrupted.
    fn install_timer(&self, key: &str, generation: u64, handle: TimerHandle) {
        let stale = match self.debounces.get_mut(key) {
            Some(mut entry) if entry.armed == Some(generation) => entry.pending.replace(handle),
            _ => Some(handle),
        };
        // Dropped after the shard lock is released
        drop(stale);
    }

    /// Cancels the pending debounced call under `key`, if any.
    pub fn cancel_debounce(&self, key: &str) {
        let cancelled = self.debounces.get_mut(key).and_then(|mut entry| {
            entry.armed.take()?;
            *entry.args_mut() = None;
            Some(entry.pending.take())
        });

        if let Some(handle) = cancelled {
            if let Some(handle) = handle {
                handle.cancel();
            }
            Counters::bump(&self.counters.debounce_cancelled);
            debug!(key, "Debounce timer cancelled");
        }
    }

    /// Builds the task a debounce timer runs when it fires.
    ///
    /// The task only runs the operation if its generation is still the one
    /// armed for the key, and it disarms the entry before doing so, so a
    /// later cancel cannot interrupt a fired operation.
    fn fire_task<A, F, Fut>(&self, key: String, generation: u64, op: F) -> TimerTask
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let debounces = Arc::clone(&self.debounces);
        let counters = Arc::clone(&self.counters);

        Box::pin(async move {
            let args = match debounces.get_mut(&key) {
                Some(mut entry) if entry.armed == Some(generation) => {
                    entry.armed = None;
                    // Dropping our own handle does not cancel this task
                    entry.pending = None;
                    entry.args_mut().take()
                }
                // Superseded, cancelled or cleared in the meantime
                _ => return,
            };

            let Some(args) = args.and_then(|boxed| boxed.downcast::<A>().ok()) else {
                warn!(key = %key, "Debounce timer fired without matching arguments");
                return;
            };

            Counters::bump(&counters.debounce_fired);
            debug!(key = %key, "Debounce timer fired");

            op(*args).await;
        })
    }

    // ------------------------------------------------------------------
    // Registry maintenance
    // ------------------------------------------------------------------

    /// Returns a snapshot of both registries and the lifetime counters.
    pub fn get_stats(&self) -> CoordinatorStats {
        let now_ms = self.clock.now_ms();

        let mut throttles: Vec<ThrottleEntryStats> = self
            .throttles
            .iter()
            .map(|entry| entry.value().snapshot(entry.key(), now_ms))
            .collect();
        throttles.sort_by(|a, b| a.key.cmp(&b.key));

        let mut debounces: Vec<DebounceEntryStats> = self
            .debounces
            .iter()
            .map(|entry| DebounceEntryStats {
                key: entry.key().clone(),
                pending: entry.value().armed.is_some(),
            })
            .collect();
        debounces.sort_by(|a, b| a.key.cmp(&b.key));

        let pending_debounce_timers = debounces.iter().filter(|entry| entry.pending).count();

        CoordinatorStats {
            throttles,
            debounces,
            pending_debounce_timers,
            total_admitted: self.counters.admitted.load(Ordering::Relaxed),
            total_suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            total_debounce_scheduled: self.counters.debounce_scheduled.load(Ordering::Relaxed),
            total_debounce_superseded: self.counters.debounce_superseded.load(Ordering::Relaxed),
            total_debounce_fired: self.counters.debounce_fired.load(Ordering::Relaxed),
            total_debounce_cancelled: self.counters.debounce_cancelled.load(Ordering::Relaxed),
            total_evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Cancels every pending timer and empties both registries.
    ///
    /// Operations already running (admitted throttle calls, fired debounce
    /// timers) are not interrupted.
    pub fn clear_all(&self) {
        let mut cancelled = 0u64;
        let mut handles = Vec::new();
        self.debounces.retain(|_, entry| {
            if entry.armed.take().is_some() {
                cancelled += 1;
            }
            handles.extend(entry.pending.take());
            false
        });

        let throttle_keys = self.throttles.len();
        self.throttles.clear();

        for handle in handles {
            handle.cancel();
        }

        self.counters
            .debounce_cancelled
            .fetch_add(cancelled, Ordering::Relaxed);
        info!(
            throttle_keys,
            cancelled_timers = cancelled,
            "Cleared all throttle and debounce state"
        );
    }

    /// Removes entries idle for at least `idle_eviction_ms` whose removal is
    /// unobservable, and returns how many were removed.
    ///
    /// A throttle entry qualifies only if it is not in flight and its own
    /// interval has elapsed; a debounce entry only if nothing is pending.
    pub fn cleanup(&self) -> u64 {
        let now_ms = self.clock.now_ms();
        let idle_ms = self.config.idle_eviction_ms;

        let removed = self.evict(&self.throttles, now_ms, idle_ms, usize::MAX)
            + self.evict(&self.debounces, now_ms, idle_ms, usize::MAX);

        if removed > 0 {
            debug!(removed, "Cleanup removed idle entries");
        }
        removed
    }

    /// Number of throttle keys currently registered.
    pub fn throttle_keys(&self) -> usize {
        self.throttles.len()
    }

    /// Number of debounce keys currently registered.
    pub fn debounce_keys(&self) -> usize {
        self.debounces.len()
    }

    /// Spawns a task that runs [`cleanup`](Self::cleanup) every
    /// `cleanup_interval_ms`.
    ///
    /// Send on (or drop) the returned sender to stop the task.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NoRuntime`] outside a tokio runtime.
    pub fn spawn_cleanup_task(
        &self,
    ) -> Result<(JoinHandle<()>, oneshot::Sender<()>), CoordinatorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let coordinator = self.clone();
        let period = Duration::from_millis(self.config.cleanup_interval_ms);

        let handle = runtime.spawn(async move {
            info!(
                interval_ms = coordinator.config.cleanup_interval_ms,
                idle_eviction_ms = coordinator.config.idle_eviction_ms,
                "Started coordinator cleanup task"
            );

            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        info!("Coordinator cleanup task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.cleanup();
                        coordinator.warn_on_high_usage();
                    }
                }
            }
        });

        Ok((handle, stop_tx))
    }

    fn warn_on_high_usage(&self) {
        let threshold = (self.config.max_tracked_keys * HIGH_USAGE_PERCENT) / 100;
        for (kind, len) in [("throttle", self.throttles.len()), ("debounce", self.debounces.len())] {
            if len > threshold {
                warn!(
                    kind,
                    len,
                    max_tracked_keys = self.config.max_tracked_keys,
                    "High key usage in coordinator registry"
                );
            }
        }
    }

    /// Runs `f` on the entry for `key`, creating it if needed.
    ///
    /// Creation goes through the capacity check first. No shard lock is
    /// held while evicting.
    fn with_entry<V, R>(
        &self,
        registry: &Registry<V>,
        kind: &'static str,
        key: &str,
        now_ms: u64,
        create: impl FnOnce(u64) -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R
    where
        V: Evictable,
    {
        // Fast path: existing key, no allocation
        if let Some(mut entry) = registry.get_mut(key) {
            return f(entry.value_mut());
        }

        self.ensure_capacity(registry, kind, now_ms);

        let mut entry = registry
            .entry(key.to_owned())
            .or_insert_with(|| create(now_ms));
        f(entry.value_mut())
    }

    /// Makes room for one more key if the registry is at its cap.
    ///
    /// Lazy creation never fails: if nothing can be evicted the registry
    /// grows past the cap and a warning is logged.
    fn ensure_capacity<V: Evictable>(&self, registry: &Registry<V>, kind: &'static str, now_ms: u64) {
        let len = registry.len();
        if len < self.config.max_tracked_keys {
            return;
        }

        let to_remove = len.saturating_sub(self.config.eviction_target()).max(1);
        let removed = self.evict(registry, now_ms, 0, to_remove);

        if removed == 0 {
            warn!(
                kind,
                len,
                max_tracked_keys = self.config.max_tracked_keys,
                "Registry at capacity with nothing evictable, growing past the cap"
            );
        } else {
            info!(kind, removed, target = to_remove, "Capacity eviction");
        }
    }

    /// Removes up to `limit` evictable entries idle for at least
    /// `min_idle_ms`, most idle first.
    fn evict<V: Evictable>(
        &self,
        registry: &Registry<V>,
        now_ms: u64,
        min_idle_ms: u64,
        limit: usize,
    ) -> u64 {
        let mut candidates: Vec<(u64, String)> = registry
            .iter()
            .filter_map(|entry| {
                let idle_ms = now_ms.saturating_sub(entry.value().last_access_ms());
                (idle_ms >= min_idle_ms && entry.value().is_evictable(now_ms))
                    .then(|| (idle_ms, entry.key().clone()))
            })
            .collect();

        // LRU: most idle first
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0u64;
        for (_, key) in candidates.into_iter().take(limit) {
            // Re-check under the shard lock; the entry may have been used since.
            if registry
                .remove_if(&key, |_, entry| entry.is_evictable(now_ms))
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            self.counters.evicted.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }
}

impl Default for CallRateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallRateCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRateCoordinator")
            .field("throttle_keys", &self.throttles.len())
            .field("debounce_keys", &self.debounces.len())
            .field("clock", &self.clock)
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

/// The process-wide coordinator.
///
/// Created on first use with the default configuration, the system clock,
/// and the tokio scheduler. Prefer an explicit instance where one can be
/// passed around; tests in particular should build their own.
pub fn global() -> &'static CallRateCoordinator {
    static GLOBAL: OnceLock<CallRateCoordinator> = OnceLock::new();
    GLOBAL.get_or_init(CallRateCoordinator::new)
}

#[inline]
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
