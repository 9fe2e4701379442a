use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use dr_client::client::GtClient;
use dr_client::SubprocessGtClient;
use dr_core::config::Config;
use dr_core::registry::SpecRegistry;
use dr_core::status_store::{MemoryStatusStore, StatusSink};
use dr_engine::Engine;
use dr_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use dr_harness::invoker::GtInvoker;
use dr_harness::shutdown::ShutdownSignal;

const HEALTH_TICK: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Owns the wired-up reconciliation stack: one breaker per gt endpoint, one
/// invoker-backed client, one engine over the shared spec registry and
/// status store.
pub struct Daemon {
    engine: Engine,
    specs: Arc<SpecRegistry>,
    status: Arc<dyn StatusSink>,
    breaker: Arc<CircuitBreaker>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Production wiring: subprocess-backed gt client.
    pub fn new(config: Config) -> Self {
        let shutdown = ShutdownSignal::new();
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            reset_timeout: config.breaker.reset_timeout(),
            half_open_max_calls: config.breaker.half_open_max_calls,
        }));
        let invoker = GtInvoker::new(&config.gt.binary)
            .with_timeout(config.gt.invoke_timeout())
            .with_breaker(Arc::clone(&breaker))
            .with_shutdown(shutdown.clone());
        let client: Arc<dyn GtClient> = Arc::new(SubprocessGtClient::new(invoker));

        Self::wire(config, client, breaker, shutdown)
    }

    /// Test wiring: any client (usually the in-memory fake).
    pub fn with_client(config: Config, client: Arc<dyn GtClient>) -> Self {
        let shutdown = ShutdownSignal::new();
        let breaker = Arc::new(CircuitBreaker::default());
        Self::wire(config, client, breaker, shutdown)
    }

    fn wire(
        config: Config,
        client: Arc<dyn GtClient>,
        breaker: Arc<CircuitBreaker>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let specs = Arc::new(SpecRegistry::new());
        let status: Arc<dyn StatusSink> = Arc::new(MemoryStatusStore::new());
        let engine = Engine::from_config(
            &config,
            client,
            Arc::clone(&specs),
            Arc::clone(&status),
            shutdown.clone(),
        );

        Self {
            engine,
            specs,
            status,
            breaker,
            shutdown,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn specs(&self) -> Arc<SpecRegistry> {
        Arc::clone(&self.specs)
    }

    pub fn status(&self) -> Arc<dyn StatusSink> {
        Arc::clone(&self.status)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run until shutdown. The health tick logs breaker stats and queue
    /// depth so a degraded gt endpoint is visible without a debugger.
    pub async fn run(&self) -> Result<()> {
        let breaker = Arc::clone(&self.breaker);
        let shutdown = self.shutdown.clone();
        let health = tokio::spawn(async move {
            let mut rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(HEALTH_TICK) => {
                        let stats = breaker.stats();
                        debug!(
                            state = ?stats.state,
                            failures = stats.failure_count,
                            successes = stats.success_count,
                            "breaker health"
                        );
                    }
                }
            }
        });

        self.engine.run().await;
        let _ = health.await;
        info!("daemon drained");
        Ok(())
    }
}
