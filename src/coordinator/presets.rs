//! Pre-bound throttles for the notification client.
//!
//! The notification bell, the notification page and the detail view all
//! poll the same backend. Routing every call site through these presets
//! makes them share one throttle entry per endpoint, whichever component
//! fires first.
//!
//! | Preset                        | Key                       | Interval |
//! |-------------------------------|---------------------------|----------|
//! | [`FETCH_NOTIFICATION_DETAIL`] | `fetchNotificationDetail` | 10 s     |
//! | [`MARK_AS_READ`]              | `markAsRead`              | 5 s      |
//! | [`FETCH_NOTIFICATIONS`]       | `fetchNotifications`      | 15 s     |
//! | [`FETCH_UNREAD_COUNT`]        | `fetchUnreadCount`        | 10 s     |

use super::config::ThrottlePreset;
use super::core::{global, CallRateCoordinator};
use std::future::Future;

/// Loading a single notification's detail.
pub const FETCH_NOTIFICATION_DETAIL: ThrottlePreset =
    ThrottlePreset::new("fetchNotificationDetail", 10_000);

/// Marking a notification as read.
pub const MARK_AS_READ: ThrottlePreset = ThrottlePreset::new("markAsRead", 5_000);

/// Loading the notification list.
pub const FETCH_NOTIFICATIONS: ThrottlePreset = ThrottlePreset::new("fetchNotifications", 15_000);

/// Loading the unread badge count.
pub const FETCH_UNREAD_COUNT: ThrottlePreset = ThrottlePreset::new("fetchUnreadCount", 10_000);

/// Every notification preset.
pub const NOTIFICATION_PRESETS: [ThrottlePreset; 4] = [
    FETCH_NOTIFICATION_DETAIL,
    MARK_AS_READ,
    FETCH_NOTIFICATIONS,
    FETCH_UNREAD_COUNT,
];

/// Notification throttles bound to one coordinator.
///
/// Each method takes the real operation at call time and runs it only if
/// the preset's key admits it. Suppressed calls resolve to `None`.
///
/// ```rust
/// use callrate::presets::NotificationThrottles;
/// use callrate::CallRateCoordinator;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let throttles = NotificationThrottles::new(CallRateCoordinator::new());
///
/// let first = throttles.fetch_unread_count(|| async { Ok::<u32, String>(3) }).await;
/// assert_eq!(first, Some(Ok(3)));
///
/// // Another widget asking within 10 seconds is suppressed
/// let second = throttles.fetch_unread_count(|| async { Ok::<u32, String>(3) }).await;
/// assert_eq!(second, None);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NotificationThrottles {
    coordinator: CallRateCoordinator,
}

impl NotificationThrottles {
    /// Binds the presets to `coordinator`.
    pub fn new(coordinator: CallRateCoordinator) -> Self {
        Self { coordinator }
    }

    /// Binds the presets to the process-wide coordinator.
    pub fn global() -> Self {
        Self::new(global().clone())
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &CallRateCoordinator {
        &self.coordinator
    }

    /// Runs `op` under `preset`'s key and interval.
    pub fn run<F, Fut>(&self, preset: ThrottlePreset, op: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.coordinator
            .run_throttled(preset.key, preset.min_interval(), op)
    }

    /// Throttled fetch of one notification's detail.
    pub fn fetch_notification_detail<F, Fut>(&self, op: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.run(FETCH_NOTIFICATION_DETAIL, op)
    }

    /// Throttled mark-as-read.
    pub fn mark_as_read<F, Fut>(&self, op: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.run(MARK_AS_READ, op)
    }

    /// Throttled fetch of the notification list.
    pub fn fetch_notifications<F, Fut>(&self, op: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.run(FETCH_NOTIFICATIONS, op)
    }

    /// Throttled fetch of the unread count.
    pub fn fetch_unread_count<F, Fut>(&self, op: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.run(FETCH_UNREAD_COUNT, op)
    }

    /// Whether `preset` would admit a call now.
    pub fn can_call(&self, preset: ThrottlePreset) -> bool {
        self.coordinator.can_call(preset.key, preset.min_interval())
    }

    /// Forces the next call under `preset` through, e.g. after a manual refresh.
    pub fn reset(&self, preset: ThrottlePreset) {
        self.coordinator.reset_throttle(preset.key);
    }
}
