use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DesiredPhase
// ---------------------------------------------------------------------------

/// What the declaring actor wants a polecat to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredPhase {
    Idle,
    Working,
    Retired,
}

impl fmt::Display for DesiredPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DesiredPhase::Idle => "Idle",
            DesiredPhase::Working => "Working",
            DesiredPhase::Retired => "Retired",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Last-observed lifecycle phase of a polecat. Only the reconciler moves
/// this; `Retired` is absorbing and `Stuck` is recoverable only through an
/// explicit reset back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Working,
    Idle,
    Stuck,
    Retired,
}

impl Phase {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Phase) -> bool {
        matches!(
            (self, target),
            (Phase::Pending, Phase::Working)
                | (Phase::Pending, Phase::Idle)
                | (Phase::Pending, Phase::Retired)
                | (Phase::Working, Phase::Idle)
                | (Phase::Working, Phase::Stuck)
                | (Phase::Working, Phase::Retired)
                | (Phase::Idle, Phase::Working)
                | (Phase::Idle, Phase::Retired)
                | (Phase::Stuck, Phase::Idle)
                | (Phase::Stuck, Phase::Retired)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Retired)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Pending => "Pending",
            Phase::Working => "Working",
            Phase::Idle => "Idle",
            Phase::Stuck => "Stuck",
            Phase::Retired => "Retired",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Present once the polecat has completed its first reconciliation.
    Ready,
}

/// Machine-readable condition reasons set by the reconciler.
pub mod reason {
    pub const DISPATCHED: &str = "Dispatched";
    pub const DISPATCH_FAILED: &str = "DispatchFailed";
    pub const RESET: &str = "Reset";
    pub const RESET_FAILED: &str = "ResetFailed";
    pub const RETIRED: &str = "Retired";
    pub const TEARDOWN_FAILED: &str = "TeardownFailed";
    pub const UNCOMMITTED_WORK: &str = "UncommittedWork";
    pub const STATUS_SYNC_FAILED: &str = "StatusSyncFailed";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const STALLED: &str = "Stalled";
    pub const IDLE: &str = "Idle";
}

/// One observed condition. A status carries at most one condition per
/// [`ConditionType`]; `last_transition_time` moves only when the truth
/// value flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PolecatSpec
// ---------------------------------------------------------------------------

/// Declared desired state for one polecat. Owned by the declaring actor;
/// the reconciler only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolecatSpec {
    pub name: String,
    /// The gt rig the polecat lives in.
    pub rig: String,
    pub desired_phase: DesiredPhase,
    /// Bead to sling when work is desired. May be empty while idle.
    #[serde(default)]
    pub bead_id: String,
    /// Convoy membership, when the polecat's bead is part of one.
    #[serde(default)]
    pub convoy_id: Option<String>,
}

impl PolecatSpec {
    pub fn new(name: impl Into<String>, rig: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rig: rig.into(),
            desired_phase: DesiredPhase::Idle,
            bead_id: String::new(),
            convoy_id: None,
        }
    }

    pub fn with_desired(mut self, desired: DesiredPhase) -> Self {
        self.desired_phase = desired;
        self
    }

    pub fn with_bead(mut self, bead: impl Into<String>) -> Self {
        self.bead_id = bead.into();
        self
    }

    pub fn with_convoy(mut self, convoy: impl Into<String>) -> Self {
        self.convoy_id = Some(convoy.into());
        self
    }
}

// ---------------------------------------------------------------------------
// PolecatStatus
// ---------------------------------------------------------------------------

/// Last-observed state of one polecat. Exclusively owned and mutated by the
/// reconciler; everything else reads snapshots through the status sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolecatStatus {
    pub phase: Phase,
    /// Rig the polecat was last reconciled in. Needed for best-effort
    /// teardown after the spec is gone.
    #[serde(default)]
    pub rig: String,
    /// gt session handle. `None` until the first dispatch; a handle is never
    /// reused by two different polecats.
    pub session: Option<String>,
    /// Branch the session is working on, as reported by gt.
    pub branch: Option<String>,
    /// Whether gt reports the session as currently active.
    pub session_active: Option<bool>,
    pub conditions: Vec<Condition>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PolecatStatus {
    pub fn new() -> Self {
        Self {
            phase: Phase::Pending,
            rig: String::new(),
            session: None,
            branch: None,
            session_active: None,
            conditions: Vec::new(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Upsert a condition, keyed by type. Order of first appearance is
    /// preserved; `last_transition_time` is bumped only when the truth value
    /// flips.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let now = Utc::now();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.into();
                existing.message = message.into();
            }
            None => self.conditions.push(Condition {
                condition_type,
                status,
                reason: reason.into(),
                message: message.into(),
                last_transition_time: now,
            }),
        }
        self.updated_at = now;
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Truth value of the `Ready` condition, if it has been set.
    pub fn ready(&self) -> Option<bool> {
        self.condition(ConditionType::Ready).map(|c| c.status)
    }
}

impl Default for PolecatStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ConvoyView
// ---------------------------------------------------------------------------

/// Roll-up of one convoy's polecats, recomputed from reconciler output on
/// every aggregation pass and never cached across passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoyView {
    pub convoy_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: usize,
    pub members: Vec<String>,
}

impl ConvoyView {
    /// Terminal when every member has come to rest: all retired or stuck,
    /// none still running. An empty convoy is not terminal.
    pub fn is_terminal(&self) -> bool {
        self.total > 0 && self.running == 0 && self.succeeded + self.failed == self.total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
