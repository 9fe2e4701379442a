use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{GtError, Result};
use crate::shutdown::ShutdownSignal;

pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// GtInvoker
// ---------------------------------------------------------------------------

/// Runs one gt invocation with a hard timeout and reports the outcome to the
/// attached circuit breaker.
///
/// The invoker deals only in raw stdout text; decoding happens in the client
/// layer, and a decode failure is never reported here as a breaker failure.
#[derive(Debug, Clone)]
pub struct GtInvoker {
    binary: PathBuf,
    timeout: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
    shutdown: Option<ShutdownSignal>,
}

impl GtInvoker {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_INVOKE_TIMEOUT,
            breaker: None,
            shutdown: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Invoke `gt` with the given arguments and return raw stdout.
    ///
    /// When the breaker refuses the call, no subprocess is started and no
    /// timer is consumed. Every started invocation reports success or
    /// failure back to the breaker.
    pub async fn invoke(&self, args: &[&str]) -> Result<String> {
        let command = self.command_line(args);

        if let Some(breaker) = &self.breaker {
            if !breaker.allow_request() {
                debug!(command = %command, "circuit open, refusing invocation");
                return Err(GtError::CircuitOpen { command });
            }
        }

        let result = self.run(args, command).await;

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(e) => {
                    warn!(error = %e, "gt invocation failed");
                    breaker.record_failure();
                }
            }
        }

        result
    }

    async fn run(&self, args: &[&str], command: String) -> Result<String> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GtError::Spawn {
                command: command.clone(),
                message: e.to_string(),
            })?;

        // kill_on_drop reaps the child on both the timeout and the shutdown
        // branch, since dropping the future drops the child handle.
        let wait = tokio::time::timeout(self.timeout, child.wait_with_output());
        let waited = match &self.shutdown {
            Some(signal) => {
                let mut rx = signal.subscribe();
                tokio::select! {
                    waited = wait => waited,
                    _ = rx.recv() => {
                        debug!(command = %command, "invocation cancelled by shutdown");
                        return Err(GtError::Cancelled { command });
                    }
                }
            }
            None => wait.await,
        };

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GtError::Spawn {
                    command,
                    message: e.to_string(),
                })
            }
            Err(_elapsed) => {
                warn!(command = %command, timeout = ?self.timeout, "invocation timed out");
                return Err(GtError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if stderr.is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr
            };
            Err(GtError::Tool { command, stderr })
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        let mut line = self.binary.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
