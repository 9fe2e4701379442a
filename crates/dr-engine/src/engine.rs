use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use dr_client::client::GtClient;
use dr_core::config::Config;
use dr_core::registry::SpecRegistry;
use dr_core::status_store::StatusSink;
use dr_harness::shutdown::ShutdownSignal;

use crate::convoy::ConvoyAggregator;
use crate::queue::{QueueHandler, WorkQueue};
use crate::reconciler::{Intervals, PolecatReconciler, ReconcileOutcome};

const POLECAT_PREFIX: &str = "polecat/";
const CONVOY_PREFIX: &str = "convoy/";

pub fn polecat_key(name: &str) -> String {
    format!("{POLECAT_PREFIX}{name}")
}

pub fn convoy_key(id: &str) -> String {
    format!("{CONVOY_PREFIX}{id}")
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ties the queue, the polecat reconciler, and the convoy aggregator
/// together and runs them until shutdown.
pub struct Engine {
    queue: WorkQueue,
    specs: Arc<SpecRegistry>,
    handler: Arc<EngineHandler>,
    shutdown: ShutdownSignal,
    workers: usize,
    resync_interval: Duration,
}

impl Engine {
    pub fn from_config(
        config: &Config,
        client: Arc<dyn GtClient>,
        specs: Arc<SpecRegistry>,
        status: Arc<dyn StatusSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let intervals = Intervals {
            poll: config.reconciler.poll_interval(),
            retry: config.reconciler.retry_interval(),
            hold: config.reconciler.resync_interval(),
            stall_threshold: config.reconciler.stall_threshold(),
        };
        let reconciler = Arc::new(PolecatReconciler::new(
            Arc::clone(&client),
            Arc::clone(&specs),
            Arc::clone(&status),
            intervals,
        ));
        let convoys = Arc::new(ConvoyAggregator::new(
            client,
            Arc::clone(&specs),
            status,
            config.convoy.notify_address.clone(),
            config.convoy.poll_interval(),
        ));

        Self {
            queue: WorkQueue::new(shutdown.clone()),
            specs,
            handler: Arc::new(EngineHandler { reconciler, convoys }),
            shutdown,
            workers: config.reconciler.workers,
            resync_interval: config.reconciler.resync_interval(),
        }
    }

    /// Wake one polecat. The declaring actor calls this after a spec edit.
    pub fn enqueue_polecat(&self, name: &str) {
        self.queue.enqueue(&polecat_key(name));
    }

    /// Wake one convoy.
    pub fn enqueue_convoy(&self, id: &str) {
        self.queue.enqueue(&convoy_key(id));
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Seed everything known, start the resync tick, and run the worker
    /// pool until shutdown.
    pub async fn run(&self) {
        self.seed();

        let queue = self.queue.clone();
        let specs = Arc::clone(&self.specs);
        let shutdown = self.shutdown.clone();
        let resync_interval = self.resync_interval;
        let resync = tokio::spawn(async move {
            let mut rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(resync_interval) => {
                        debug!("resync sweep");
                        for name in specs.names() {
                            queue.enqueue(&polecat_key(&name));
                        }
                        for id in specs.convoy_ids() {
                            queue.enqueue(&convoy_key(&id));
                        }
                    }
                }
            }
        });

        info!(workers = self.workers, "engine running");
        self.queue
            .run(self.workers, Arc::clone(&self.handler) as Arc<dyn QueueHandler>)
            .await;

        let _ = resync.await;
        info!("engine stopped");
    }

    fn seed(&self) {
        let names = self.specs.names();
        let convoys = self.specs.convoy_ids();
        info!(polecats = names.len(), convoys = convoys.len(), "seeding queue");
        for name in names {
            self.queue.enqueue(&polecat_key(&name));
        }
        for id in convoys {
            self.queue.enqueue(&convoy_key(&id));
        }
    }
}

// ---------------------------------------------------------------------------
// EngineHandler
// ---------------------------------------------------------------------------

struct EngineHandler {
    reconciler: Arc<PolecatReconciler>,
    convoys: Arc<ConvoyAggregator>,
}

#[async_trait]
impl QueueHandler for EngineHandler {
    async fn handle(&self, key: &str) -> ReconcileOutcome {
        if let Some(name) = key.strip_prefix(POLECAT_PREFIX) {
            self.reconciler.reconcile(name).await
        } else if let Some(id) = key.strip_prefix(CONVOY_PREFIX) {
            self.convoys.reconcile(id).await
        } else {
            warn!(key = %key, "unknown queue key");
            ReconcileOutcome::done()
        }
    }
}
