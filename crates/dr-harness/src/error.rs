use std::time::Duration;

// ---------------------------------------------------------------------------
// FailureClass
// ---------------------------------------------------------------------------

/// Coarse classification that drives the reconciler's retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, cancellation, circuit open. Retry on the normal schedule.
    Transient,
    /// gt ran and reported failure, or could not be started at all.
    Tool,
    /// Malformed desired state. Retrying without a spec change is pointless.
    Permanent,
    /// gt output did not match its contract. A defect, not a transient.
    Parse,
}

// ---------------------------------------------------------------------------
// GtError
// ---------------------------------------------------------------------------

/// Everything that can go wrong talking to the gt CLI.
#[derive(Debug, thiserror::Error)]
pub enum GtError {
    /// The circuit breaker refused the call before any subprocess started.
    #[error("circuit open, refusing `{command}`")]
    CircuitOpen { command: String },

    /// The invocation exceeded its hard timeout and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Process shutdown interrupted the invocation.
    #[error("`{command}` cancelled by shutdown")]
    Cancelled { command: String },

    /// gt ran and exited non-zero; stderr is carried for the condition
    /// message.
    #[error("`{command}` failed: {stderr}")]
    Tool { command: String, stderr: String },

    /// gt could not be started at all (binary missing, permissions).
    #[error("could not start `{command}`: {message}")]
    Spawn { command: String, message: String },

    /// The invocation succeeded but its output could not be decoded.
    #[error("unexpected gt output: {0}")]
    Parse(String),

    /// The declared spec is malformed for the requested transition.
    #[error("invalid spec: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, GtError>;

impl GtError {
    pub fn class(&self) -> FailureClass {
        match self {
            GtError::CircuitOpen { .. } | GtError::Timeout { .. } | GtError::Cancelled { .. } => {
                FailureClass::Transient
            }
            GtError::Tool { .. } | GtError::Spawn { .. } => FailureClass::Tool,
            GtError::Validation(_) => FailureClass::Permanent,
            GtError::Parse(_) => FailureClass::Parse,
        }
    }

    /// Whether a bounded retry can plausibly succeed without outside
    /// intervention. Spawn failures need an operator, not a retry loop.
    pub fn is_retryable(&self) -> bool {
        match self.class() {
            FailureClass::Transient => true,
            FailureClass::Tool => !matches!(self, GtError::Spawn { .. }),
            FailureClass::Permanent | FailureClass::Parse => false,
        }
    }
}
