use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, all calls pass through.
    Closed,
    /// Too many consecutive failures, calls are rejected immediately.
    Open,
    /// Probing recovery with a bounded budget.
    HalfOpen,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens. The streak resets on
    /// any success.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probes are admitted.
    pub reset_timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Zero or negative-equivalent settings fall back to the defaults,
    /// never to a breaker that can silently admit or refuse everything.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.failure_threshold == 0 {
            warn!("failure_threshold was 0, using default {}", defaults.failure_threshold);
            self.failure_threshold = defaults.failure_threshold;
        }
        if self.reset_timeout.is_zero() {
            warn!("reset_timeout was zero, using default {:?}", defaults.reset_timeout);
            self.reset_timeout = defaults.reset_timeout;
        }
        if self.half_open_max_calls == 0 {
            warn!(
                "half_open_max_calls was 0, using default {}",
                defaults.half_open_max_calls
            );
            self.half_open_max_calls = defaults.half_open_max_calls;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Read-only snapshot for observability.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: CircuitState,
    /// Current consecutive-failure streak.
    pub failure_count: u32,
    /// Successes recorded since construction or the last `reset()`.
    pub success_count: u64,
    pub last_failure_age: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Inner state (behind RwLock)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    half_open_probes: u32,
}

impl Inner {
    fn fresh() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            success_count: 0,
            last_failure: None,
            half_open_probes: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Three-state failure isolation in front of the gt invoker.
///
/// One instance per gt endpoint, constructed explicitly and shared by
/// reference into every invoker; reconciliation workers on many tasks hit it
/// concurrently. State queries take the read lock; `allow_request` and the
/// record calls take the write lock.
///
/// `Open` decays to `HalfOpen` lazily: the transition is evaluated on each
/// query once `reset_timeout` has elapsed since the last failure. There is
/// no timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: config.sanitized(),
            inner: RwLock::new(Inner::fresh()),
        }
    }

    /// May this request proceed?
    ///
    /// Closed: always. Open: only once the reset timeout has elapsed, which
    /// moves the circuit to HalfOpen and admits the first probe. HalfOpen:
    /// admitted while probe budget remains; each admission consumes one unit.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.write();
        if inner.state == CircuitState::Open && self.reset_elapsed(&inner) {
            info!("circuit breaker transitioning Open -> HalfOpen");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_probes = 0;
        }

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_calls {
                    inner.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.write();
        inner.success_count += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                info!("circuit breaker transitioning HalfOpen -> Closed");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.half_open_probes = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            // A late result from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.write();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker transitioning Closed -> Open"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker transitioning HalfOpen -> Open (probe failed)");
                inner.state = CircuitState::Open;
                inner.half_open_probes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state. Reports the lazy Open -> HalfOpen decay without
    /// mutating; the actual transition happens in `allow_request`.
    pub fn state(&self) -> CircuitState {
        let inner = self.read();
        self.effective_state(&inner)
    }

    /// Read-only snapshot for observability.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.read();
        BreakerStats {
            state: self.effective_state(&inner),
            failure_count: inner.consecutive_failures,
            success_count: inner.success_count,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    /// Force Closed with zeroed counters. Administrative escape hatch.
    pub fn reset(&self) {
        let mut inner = self.write();
        *inner = Inner::fresh();
        info!("circuit breaker reset to Closed");
    }

    // ----- helpers -----

    fn effective_state(&self, inner: &Inner) -> CircuitState {
        if inner.state == CircuitState::Open && self.reset_elapsed(inner) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    fn reset_elapsed(&self, inner: &Inner) -> bool {
        inner
            .last_failure
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(false)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
