//! Worker pool sizing tests for the event dispatcher
//!
//! A slow listener keeps every worker busy long enough for the pool to
//! grow to its bound, so the observed largest pool size and the number of
//! concurrently running deliveries show how the pool was sized.

use gerrit_events_core::config::DispatchConfig;
use gerrit_events_core::error::ListenerError;
use gerrit_events_core::event::{EventKind, GerritEvent, RefUpdate, RefUpdated};
use gerrit_events_core::{EventDispatcher, GerritEventListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DELIVERY_TIME: Duration = Duration::from_millis(200);

/// Sleeps on every event and records how many deliveries overlap
#[derive(Default)]
struct SlowListener {
    in_flight: AtomicUsize,
    max_parallel: AtomicUsize,
    delivered: AtomicUsize,
}

impl SlowListener {
    fn reset_max_parallel(&self) {
        self.max_parallel.store(0, Ordering::SeqCst);
    }
}

impl GerritEventListener for SlowListener {
    fn gerrit_event(&self, _event: &GerritEvent) -> Result<(), ListenerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel.fetch_max(now, Ordering::SeqCst);
        thread::sleep(DELIVERY_TIME);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ref_updated() -> GerritEvent {
    GerritEvent::new(EventKind::RefUpdated(RefUpdated {
        ref_update: RefUpdate {
            ref_name: "refs/heads/main".to_string(),
            project: "tools".to_string(),
            ..RefUpdate::default()
        },
        submitter: None,
    }))
}

fn dispatcher(config: DispatchConfig) -> (EventDispatcher, Arc<SlowListener>) {
    let dispatcher = EventDispatcher::new(&config).expect("dispatcher should start");
    let listener = Arc::new(SlowListener::default());
    dispatcher.add_listener(listener.clone());
    (dispatcher, listener)
}

fn post_events(dispatcher: &EventDispatcher, count: usize) {
    for _ in 0..count {
        dispatcher.post_event(ref_updated());
    }
}

fn wait_for_events_processed(dispatcher: &EventDispatcher) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while dispatcher.queue_depth() > 0 || dispatcher.active_count() > 0 {
        assert!(Instant::now() < deadline, "events were not processed in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_default_pool_grows_to_three_workers() {
    // Given: A dispatcher with the default worker count
    let (dispatcher, listener) = dispatcher(DispatchConfig::default());

    // When: More events than workers are posted
    post_events(&dispatcher, 5);
    wait_for_events_processed(&dispatcher);

    // Then: The pool grew to exactly the worker count
    assert_eq!(dispatcher.largest_pool_size(), 3);
    assert_eq!(listener.delivered.load(Ordering::SeqCst), 5);
    dispatcher.shutdown(true);
}

#[test]
fn test_pool_grows_to_configured_workers() {
    let (dispatcher, listener) = dispatcher(DispatchConfig::default().with_worker_threads(5));

    post_events(&dispatcher, 8);
    wait_for_events_processed(&dispatcher);

    assert_eq!(dispatcher.largest_pool_size(), 5);
    assert!(listener.max_parallel.load(Ordering::SeqCst) <= 5);
    assert_eq!(listener.delivered.load(Ordering::SeqCst), 8);
    dispatcher.shutdown(true);
}

#[test]
fn test_resize_up_while_events_are_queued() {
    // Given: A single worker with a backlog
    let (dispatcher, listener) = dispatcher(DispatchConfig::default().with_worker_threads(1));
    post_events(&dispatcher, 9);

    // When: The pool is resized while the backlog is being worked off
    dispatcher.resize(5).expect("resize should succeed");
    wait_for_events_processed(&dispatcher);

    // Then: The pool grew to the new size and never beyond it
    assert_eq!(dispatcher.worker_count(), 5);
    assert_eq!(dispatcher.largest_pool_size(), 5);
    assert!(listener.max_parallel.load(Ordering::SeqCst) <= 5);
    assert_eq!(listener.delivered.load(Ordering::SeqCst), 9);
    dispatcher.shutdown(true);
}

#[test]
fn test_resize_down_limits_parallel_deliveries() {
    // Given: Five busy workers
    let (dispatcher, listener) = dispatcher(DispatchConfig::default().with_worker_threads(5));
    post_events(&dispatcher, 10);
    wait_for_events_processed(&dispatcher);
    assert_eq!(dispatcher.largest_pool_size(), 5);

    // When: The pool shrinks to three and settles
    dispatcher.resize(3).expect("resize should succeed");
    thread::sleep(Duration::from_secs(1));
    listener.reset_max_parallel();
    post_events(&dispatcher, 5);
    wait_for_events_processed(&dispatcher);

    // Then: No more than three deliveries ever overlapped
    assert_eq!(listener.max_parallel.load(Ordering::SeqCst), 3);
    assert!(dispatcher.pool_size() <= 3);
    dispatcher.shutdown(true);
}

#[test]
fn test_shrinking_below_one_worker_keeps_one() {
    let (dispatcher, listener) = dispatcher(DispatchConfig::default());

    dispatcher.resize(0).expect("resize should succeed");
    assert_eq!(dispatcher.worker_count(), 1);

    post_events(&dispatcher, 2);
    wait_for_events_processed(&dispatcher);
    assert_eq!(listener.delivered.load(Ordering::SeqCst), 2);
    dispatcher.shutdown(true);
}

#[test]
fn test_queue_snapshot_shows_backlog() {
    let (dispatcher, _listener) = dispatcher(DispatchConfig::default().with_worker_threads(1));

    post_events(&dispatcher, 4);
    // One event is being delivered, the rest wait in the queue
    thread::sleep(DELIVERY_TIME / 2);
    let queued = dispatcher.work_queue_snapshot();
    assert_eq!(queued.len(), dispatcher.queue_depth());
    assert!(queued.iter().all(|item| item.kind() == "internal-event"));
    assert!(!queued.is_empty());

    dispatcher.shutdown(true);
}

#[test]
fn test_shutdown_waits_for_queued_events() {
    let (dispatcher, listener) =
        dispatcher(DispatchConfig::default().with_worker_threads(2).with_shutdown_grace_secs(5));

    post_events(&dispatcher, 4);
    dispatcher.shutdown(true);

    assert_eq!(listener.delivered.load(Ordering::SeqCst), 4);
    assert_eq!(dispatcher.pool_size(), 0);
}

#[test]
fn test_shutdown_discards_backlog_after_grace_period() {
    // Given: One worker, a backlog, and a one second grace period
    let (dispatcher, listener) =
        dispatcher(DispatchConfig::default().with_worker_threads(1).with_shutdown_grace_secs(1));
    post_events(&dispatcher, 20);

    // When: Shutting down with wait
    let started = Instant::now();
    dispatcher.shutdown(true);

    // Then: The rest of the backlog is dropped once the grace period is over
    assert!(started.elapsed() < Duration::from_secs(3));
    let delivered = listener.delivered.load(Ordering::SeqCst);
    assert!(delivered < 20, "delivered {}", delivered);
    assert_eq!(dispatcher.queue_depth(), 0);
}
