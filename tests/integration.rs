use callrate::presets::{NotificationThrottles, FETCH_NOTIFICATIONS, MARK_AS_READ};
use callrate::{CallRateCoordinator, Clock, CoordinatorBuilder, ManualClock, TokioClock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn paused_coordinator() -> CallRateCoordinator {
    CallRateCoordinator::with_clock(Arc::new(TokioClock::new()))
}

async fn advance_to(clock: &TokioClock, target_ms: u64) {
    let now = clock.elapsed_ms();
    if target_ms > now {
        tokio::time::sleep(Duration::from_millis(target_ms - now)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttle_timeline() {
    let clock = Arc::new(TokioClock::new());
    let coordinator = CallRateCoordinator::with_clock(clock.clone());
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    let fetch_foo = coordinator.throttle(
        move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { "foo" }
        },
        Duration::from_millis(1_000),
        "foo",
    );

    assert_eq!(fetch_foo.call(()).await, Some("foo"));

    advance_to(&clock, 500).await;
    assert_eq!(fetch_foo.call(()).await, None);

    advance_to(&clock, 1_001).await;
    assert_eq!(fetch_foo.call(()).await, Some("foo"));

    // Suppressed calls never invoke the operation
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_timeline() {
    let clock = Arc::new(TokioClock::new());
    let coordinator = CallRateCoordinator::with_clock(clock.clone());
    let saved = Arc::new(Mutex::new(Vec::new()));

    let sink = saved.clone();
    let observer = clock.clone();
    let save_draft = coordinator.debounce(
        move |draft: &'static str| {
            let sink = sink.clone();
            let at = observer.elapsed_ms();
            async move { sink.lock().unwrap().push((draft, at)) }
        },
        Duration::from_millis(300),
        "draft",
    );

    save_draft.call("A");
    advance_to(&clock, 100).await;
    save_draft.call("B");
    advance_to(&clock, 200).await;
    save_draft.call("C");

    advance_to(&clock, 1_000).await;
    let saved = saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "C");
    // Fires one delay after the last call, give or take timer granularity
    assert!((500..=502).contains(&saved[0].1), "fired at {}", saved[0].1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_operation_stays_in_flight() {
    let coordinator = paused_coordinator();
    let interval = Duration::from_millis(1_000);

    let slow = tokio::spawn(coordinator.run_throttled("x", interval, || async {
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        "done"
    }));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(coordinator.run_throttled("x", interval, || async { "t1100" }).await, None);
    assert!(coordinator.get_stats().throttle("x").unwrap().in_flight);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(slow.await.unwrap(), Some("done"));
    assert_eq!(
        coordinator.run_throttled("x", interval, || async { "t2100" }).await,
        Some("t2100")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_debounce_mid_burst() {
    let coordinator = paused_coordinator();
    let saved = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let sink = saved.clone();
    let save_draft = coordinator.debounce(
        move |draft: &'static str| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(draft) }
        },
        Duration::from_millis(300),
        "draft",
    );

    save_draft.call("A");
    tokio::time::sleep(Duration::from_millis(100)).await;
    save_draft.call("B");
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel_debounce("draft");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(saved.lock().unwrap().is_empty());
    assert_eq!(coordinator.get_stats().pending_debounce_timers, 0);
}

#[test]
fn test_admissions_respect_minimum_interval() {
    let clock = Arc::new(ManualClock::new(0));
    let coordinator = CallRateCoordinator::with_clock(clock.clone());
    let interval_ms = 700;
    let mut admitted_at = Vec::new();

    // Irregular call spacing from a fixed linear congruential sequence
    let mut seed: u64 = 0x2545_f491;
    for _ in 0..500 {
        seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        clock.advance((seed >> 33) % 400);

        let now = clock.now_ms();
        if coordinator
            .run_throttled_sync("k", Duration::from_millis(interval_ms), || ())
            .is_some()
        {
            admitted_at.push(now);
        }
    }

    assert!(admitted_at.len() > 10);
    for pair in admitted_at.windows(2) {
        assert!(pair[1] - pair[0] >= interval_ms, "admitted too soon: {:?}", pair);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_operation_does_not_lock_key() {
    let coordinator = paused_coordinator();
    let interval = Duration::from_millis(500);

    let failed = coordinator
        .run_throttled("flaky", interval, || async { Err::<u32, String>("503".into()) })
        .await;
    assert_eq!(failed, Some(Err("503".to_string())));

    tokio::time::sleep(interval).await;
    let retried = coordinator
        .run_throttled("flaky", interval, || async { Ok::<u32, String>(1) })
        .await;
    assert_eq!(retried, Some(Ok(1)));
}

#[tokio::test(start_paused = true)]
async fn test_keys_do_not_interfere() {
    let coordinator = paused_coordinator();
    let fired = Arc::new(Mutex::new(Vec::new()));

    for key in ["left", "right"] {
        let fired = fired.clone();
        coordinator.schedule_debounced(key, Duration::from_millis(200), key, move |key| async move {
            fired.lock().unwrap().push(key);
        });
    }
    coordinator.cancel_debounce("left");

    // A throttle in flight under one key leaves another key alone
    let _held = coordinator.run_throttled("slow", Duration::ZERO, || std::future::pending::<()>());
    assert_eq!(
        coordinator.run_throttled("fast", Duration::ZERO, || async { 1 }).await,
        Some(1)
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*fired.lock().unwrap(), vec!["right"]);
}

#[test]
fn test_reset_always_admits_next_call() {
    let clock = Arc::new(ManualClock::new(0));
    let coordinator = CallRateCoordinator::with_clock(clock.clone());
    let hour = Duration::from_secs(3_600);

    for step in 0..5 {
        coordinator.run_throttled_sync("refresh", hour, || ());
        clock.advance(step);
        coordinator.reset_throttle("refresh");
        assert_eq!(coordinator.run_throttled_sync("refresh", hour, || step), Some(step));
    }
}

#[test]
fn test_concurrent_threads_admit_once() {
    let coordinator = CallRateCoordinator::new();
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    if coordinator
                        .run_throttled_sync("shared", Duration::from_secs(60), || ())
                        .is_some()
                    {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    let stats = coordinator.get_stats();
    assert_eq!(stats.total_admitted, 1);
    assert_eq!(stats.total_suppressed, (threads * 100 - 1) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_respect_in_flight() {
    let coordinator = CallRateCoordinator::new();
    let running = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            let running = running.clone();
            let overlap = overlap.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let running = running.clone();
                    let overlap = overlap.clone();
                    coordinator
                        .run_throttled("exclusive", Duration::ZERO, || async move {
                            if running.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlap.fetch_add(1, Ordering::SeqCst);
                            }
                            tokio::task::yield_now().await;
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert!(coordinator.get_stats().total_admitted > 0);
}

#[tokio::test(start_paused = true)]
async fn test_notification_presets_share_keys_across_widgets() {
    let coordinator = paused_coordinator();
    let bell = NotificationThrottles::new(coordinator.clone());
    let page = NotificationThrottles::new(coordinator.clone());

    assert_eq!(bell.fetch_notifications(|| async { vec![1, 2] }).await, Some(vec![1, 2]));
    assert_eq!(page.fetch_notifications(|| async { vec![3] }).await, None);

    assert_eq!(page.mark_as_read(|| async { true }).await, Some(true));
    tokio::time::sleep(MARK_AS_READ.min_interval()).await;
    assert!(bell.can_call(MARK_AS_READ));
    assert!(!bell.can_call(FETCH_NOTIFICATIONS));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(bell.can_call(FETCH_NOTIFICATIONS));

    // Raw key access reaches the same entry
    assert!(!coordinator.can_call("fetchNotifications", Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_task_lifecycle() {
    let coordinator = CoordinatorBuilder::new()
        .idle_eviction_ms(200)
        .cleanup_interval_ms(100)
        .clock(Arc::new(TokioClock::new()))
        .build();

    // Phase 1: register keys
    for i in 0..50 {
        coordinator.run_throttled_sync(&format!("widget-{i}"), Duration::from_millis(50), || ());
    }
    assert_eq!(coordinator.throttle_keys(), 50);

    // Phase 2: start cleanup
    let (handle, stop_tx) = coordinator.spawn_cleanup_task().unwrap();

    // Phase 3: keep a few keys busy while the rest go idle
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        for i in 0..10 {
            coordinator.run_throttled_sync(&format!("widget-{i}"), Duration::from_millis(50), || ());
        }
    }

    assert_eq!(coordinator.throttle_keys(), 10);

    // Phase 4: stop
    stop_tx.send(()).unwrap();
    handle.await.unwrap();

    let stats = coordinator.get_stats();
    assert_eq!(stats.total_evicted, 40);
}
