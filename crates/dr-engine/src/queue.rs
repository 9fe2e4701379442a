use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use dr_harness::shutdown::ShutdownSignal;

use crate::reconciler::ReconcileOutcome;

// ---------------------------------------------------------------------------
// QueueHandler
// ---------------------------------------------------------------------------

/// One reconciliation entry point, keyed by an opaque string.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, key: &str) -> ReconcileOutcome;
}

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

/// Event-driven work queue with requeue-after delays.
///
/// Guarantees: at most one in-flight pass per key (a colliding delivery is
/// parked and replayed when the running pass finishes), while distinct keys
/// run concurrently across a bounded pool of worker tasks. Delays are real
/// timers, not polling. Workers race the shutdown signal.
#[derive(Clone)]
pub struct WorkQueue {
    tx: flume::Sender<String>,
    rx: flume::Receiver<String>,
    busy: Arc<DashMap<String, ()>>,
    parked: Arc<DashMap<String, ()>>,
    shutdown: ShutdownSignal,
}

impl WorkQueue {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            busy: Arc::new(DashMap::new()),
            parked: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    /// Schedule `key` for reconciliation now.
    pub fn enqueue(&self, key: &str) {
        if self.tx.send(key.to_string()).is_err() {
            warn!(key = %key, "work queue closed, dropping enqueue");
        }
    }

    /// Schedule `key` after `delay`. The timer dies with the shutdown
    /// signal, so a draining daemon does not leak sleepers.
    pub fn enqueue_after(&self, key: &str, delay: Duration) {
        let tx = self.tx.clone();
        let key = key.to_string();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut rx = shutdown.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send_async(key).await;
                }
                _ = rx.recv() => {}
            }
        });
    }

    /// Number of keys waiting in the channel (excludes parked keys).
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    /// Run `workers` concurrent worker loops until shutdown.
    pub async fn run(&self, workers: usize, handler: Arc<dyn QueueHandler>) {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = self.clone();
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(async move {
                queue.worker_loop(worker_id, handler).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, worker_id: usize, handler: Arc<dyn QueueHandler>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        debug!(worker_id, "queue worker started");

        loop {
            let key = tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = self.rx.recv_async() => match received {
                    Ok(key) => key,
                    Err(_) => break,
                },
            };

            if self.busy.insert(key.clone(), ()).is_some() {
                // Already being reconciled; park and replay afterwards so
                // the wake-up is not lost.
                self.parked.insert(key, ());
                continue;
            }

            let outcome = handler.handle(&key).await;
            self.busy.remove(&key);

            if self.parked.remove(&key).is_some() {
                // A racing duplicate here only costs an extra
                // level-triggered pass; passes are idempotent.
                self.enqueue(&key);
            } else if let Some(delay) = outcome.requeue_after {
                self.enqueue_after(&key, delay);
            }
        }

        debug!(worker_id, "queue worker stopped");
    }
}
