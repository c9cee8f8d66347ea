//! Typed wrappers returned by [`CallRateCoordinator::throttle`] and
//! [`CallRateCoordinator::debounce`].
//!
//! A wrapper owns the operation and remembers its key and timing, so call
//! sites only pass arguments. Operations take a single argument; use a
//! tuple for several and `()` for none.

use super::core::CallRateCoordinator;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// An operation throttled under a fixed key and interval.
///
/// ```rust
/// use callrate::{CallRateCoordinator, ManualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let clock = Arc::new(ManualClock::new(0));
/// let coordinator = CallRateCoordinator::with_clock(clock.clone());
///
/// let mark_read = coordinator.throttle(
///     |(user, id): (u32, u64)| async move { Ok::<_, String>(format!("{user}:{id}")) },
///     Duration::from_secs(5),
///     "markAsRead",
/// );
///
/// assert_eq!(mark_read.call((7, 42)).await, Some(Ok("7:42".to_string())));
/// assert_eq!(mark_read.call((7, 43)).await, None);
///
/// clock.advance(5_000);
/// assert!(mark_read.can_call());
/// # }
/// ```
#[derive(Clone)]
pub struct Throttled<F> {
    coordinator: CallRateCoordinator,
    op: F,
    min_interval: Duration,
    key: String,
}

impl<F> Throttled<F> {
    pub(crate) fn new(
        coordinator: CallRateCoordinator,
        op: F,
        min_interval: Duration,
        key: String,
    ) -> Self {
        Self {
            coordinator,
            op,
            min_interval,
            key,
        }
    }

    /// Calls the operation if admitted.
    ///
    /// Admission is decided now; the returned future resolves to
    /// `Some(output)` if admitted, `None` if suppressed.
    pub fn call<A, Fut>(&self, args: A) -> impl Future<Output = Option<Fut::Output>>
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        let admitted = self
            .coordinator
            .try_admit(&self.key, self.min_interval)
            .map(|guard| (guard, (self.op)(args)));

        async move {
            let (_guard, operation) = admitted?;
            Some(operation.await)
        }
    }

    /// Whether a call made now would be admitted.
    pub fn can_call(&self) -> bool {
        self.coordinator.can_call(&self.key, self.min_interval)
    }

    /// Resets the shared throttle state for this key.
    pub fn reset(&self) {
        self.coordinator.reset_throttle(&self.key);
    }

    /// The throttle key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The minimum interval between admitted calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl<F> fmt::Debug for Throttled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled")
            .field("key", &self.key)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

/// An operation debounced under a fixed key and delay.
///
/// Calls are fire-and-forget: each one replaces whatever is pending, and
/// the operation runs once with the last arguments after a quiet period of
/// `delay`.
pub struct Debounced<F> {
    coordinator: CallRateCoordinator,
    op: Arc<F>,
    delay: Duration,
    key: String,
}

impl<F> Debounced<F> {
    pub(crate) fn new(coordinator: CallRateCoordinator, op: F, delay: Duration, key: String) -> Self {
        Self {
            coordinator,
            op: Arc::new(op),
            delay,
            key,
        }
    }

    /// Schedules the operation with `args`, cancelling any pending call.
    pub fn call<A, Fut>(&self, args: A)
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let op = Arc::clone(&self.op);
        self.coordinator
            .schedule_debounced(&self.key, self.delay, args, move |args| op(args));
    }

    /// Cancels the pending call, if any.
    pub fn cancel(&self) {
        self.coordinator.cancel_debounce(&self.key);
    }

    /// The debounce key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The quiet period before the operation runs.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<F> Clone for Debounced<F> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            op: Arc::clone(&self.op),
            delay: self.delay,
            key: self.key.clone(),
        }
    }
}

impl<F> fmt::Debug for Debounced<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounced")
            .field("key", &self.key)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
