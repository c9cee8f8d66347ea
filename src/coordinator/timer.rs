//! # Timer Facility (timer.rs)
//!
//! Debounce needs "run this later, unless I change my mind". That
//! capability is injected through the [`Scheduler`] trait so the coordinator
//! never reaches for a global runtime directly.
//!
//! ```text
//!     schedule(delay, task) ──► TimerHandle
//!                                   │
//!            ┌──────────────────────┴───────────────┐
//!            │                                      │
//!     delay elapses                          handle.cancel()
//!            │                                      │
//!            ▼                                      ▼
//!       task runs                             task never runs
//! ```

use super::error::CoordinatorError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Work handed to a [`Scheduler`] to run once the delay elapses.
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules one-shot delayed tasks with cancellable handles.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Runs `task` after `delay` unless the returned handle is cancelled first.
    ///
    /// The coordinator holds no registry lock while calling this or a
    /// handle's cancel action, so an implementation may run a zero-delay
    /// task before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying timer facility is unavailable.
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, CoordinatorError>;
}

/// Handle to a scheduled task.
///
/// Dropping a handle does not cancel the task; only [`TimerHandle::cancel`]
/// does.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl TimerHandle {
    /// Wraps a cancellation action.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Prevents the task from running if it has not started yet.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

/// [`Scheduler`] backed by `tokio::spawn` and `tokio::time::sleep`.
///
/// Cancellation aborts the spawned task. A task that has already passed its
/// sleep and is running its work is only interrupted at its next `.await`,
/// which is why the coordinator detaches its bookkeeping from the handle
/// before running a fired operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, CoordinatorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;

        let join = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let abort = join.abort_handle();

        Ok(TimerHandle::new(move || abort.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let _handle = TokioScheduler
            .schedule(
                Duration::from_millis(100),
                Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = TokioScheduler
            .schedule(
                Duration::from_millis(100),
                Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_tokio_scheduler_without_runtime() {
        let result = TokioScheduler.schedule(Duration::from_millis(1), Box::pin(async {}));
        assert_eq!(result.unwrap_err(), CoordinatorError::NoRuntime);
    }
}
