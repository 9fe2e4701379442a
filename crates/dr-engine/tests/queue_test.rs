use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dr_engine::{QueueHandler, ReconcileOutcome, WorkQueue};
use dr_harness::shutdown::ShutdownSignal;

/// Test handler: counts passes per key, tracks in-flight overlap, and
/// requeues each key a configured number of times.
struct CountingHandler {
    passes: DashMap<String, usize>,
    in_flight: DashMap<String, ()>,
    overlap_seen: AtomicUsize,
    peak_concurrency: AtomicUsize,
    current: AtomicUsize,
    requeues: usize,
    delay: Duration,
    work: Duration,
}

impl CountingHandler {
    fn new(requeues: usize, delay: Duration, work: Duration) -> Self {
        Self {
            passes: DashMap::new(),
            in_flight: DashMap::new(),
            overlap_seen: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            requeues,
            delay,
            work,
        }
    }

    fn passes_for(&self, key: &str) -> usize {
        self.passes.get(key).map(|entry| *entry.value()).unwrap_or(0)
    }
}

#[async_trait]
impl QueueHandler for CountingHandler {
    async fn handle(&self, key: &str) -> ReconcileOutcome {
        if self.in_flight.insert(key.to_string(), ()).is_some() {
            // Two concurrent passes for the same key: the one guarantee the
            // queue must never break.
            self.overlap_seen.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.work).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.remove(key);

        let mut entry = self.passes.entry(key.to_string()).or_insert(0);
        *entry += 1;
        let count = *entry;
        drop(entry);

        if count <= self.requeues {
            ReconcileOutcome::after(self.delay)
        } else {
            ReconcileOutcome::done()
        }
    }
}

#[tokio::test]
async fn requeue_after_fires_the_next_pass() {
    let shutdown = ShutdownSignal::new();
    let queue = WorkQueue::new(shutdown.clone());
    let handler = Arc::new(CountingHandler::new(
        2,
        Duration::from_millis(20),
        Duration::ZERO,
    ));

    let runner = {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            queue.run(2, handler as Arc<dyn QueueHandler>).await;
        })
    };

    queue.enqueue("polecat/nux");
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Initial pass plus two requeued passes, then done.
    assert_eq!(handler.passes_for("polecat/nux"), 3);

    shutdown.trigger();
    runner.await.unwrap();
}

#[tokio::test]
async fn same_key_never_runs_concurrently() {
    let shutdown = ShutdownSignal::new();
    let queue = WorkQueue::new(shutdown.clone());
    let handler = Arc::new(CountingHandler::new(
        0,
        Duration::ZERO,
        Duration::from_millis(50),
    ));

    let runner = {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            queue.run(4, handler as Arc<dyn QueueHandler>).await;
        })
    };

    // A burst of wake-ups for one key.
    for _ in 0..4 {
        queue.enqueue("polecat/nux");
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(handler.overlap_seen.load(Ordering::SeqCst), 0);
    // The burst coalesces, but at least one replay must have happened so a
    // parked wake-up is never lost.
    assert!(handler.passes_for("polecat/nux") >= 2);

    shutdown.trigger();
    runner.await.unwrap();
}

#[tokio::test]
async fn distinct_keys_run_concurrently() {
    let shutdown = ShutdownSignal::new();
    let queue = WorkQueue::new(shutdown.clone());
    let handler = Arc::new(CountingHandler::new(
        0,
        Duration::ZERO,
        Duration::from_millis(100),
    ));

    let runner = {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            queue.run(2, handler as Arc<dyn QueueHandler>).await;
        })
    };

    queue.enqueue("polecat/nux");
    queue.enqueue("polecat/slit");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(handler.peak_concurrency.load(Ordering::SeqCst), 2);
    assert_eq!(handler.passes_for("polecat/nux"), 1);
    assert_eq!(handler.passes_for("polecat/slit"), 1);

    shutdown.trigger();
    runner.await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_workers_and_cancels_timers() {
    let shutdown = ShutdownSignal::new();
    let queue = WorkQueue::new(shutdown.clone());
    let handler = Arc::new(CountingHandler::new(0, Duration::ZERO, Duration::ZERO));

    let runner = {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            queue.run(2, handler as Arc<dyn QueueHandler>).await;
        })
    };

    // A far-future timer must not keep the daemon alive past shutdown.
    queue.enqueue_after("polecat/nux", Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(20)).await;

    shutdown.trigger();
    let joined = tokio::time::timeout(Duration::from_secs(1), runner).await;
    assert!(joined.is_ok(), "workers did not stop on shutdown");
}
