use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use dr_client::client::{GtClient, PolecatSessionStatus};
use dr_core::registry::SpecRegistry;
use dr_core::status_store::StatusSink;
use dr_core::types::{reason, ConditionType, DesiredPhase, Phase, PolecatSpec, PolecatStatus};
use dr_harness::error::GtError;

// ---------------------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------------------

/// Requeue schedule. Fixed short intervals, not exponential backoff: the
/// circuit breaker, not per-call backoff, is the overload defense.
#[derive(Debug, Clone)]
pub struct Intervals {
    /// While a polecat is working and healthy.
    pub poll: Duration,
    /// After a retryable external-call failure.
    pub retry: Duration,
    /// After a non-retryable failure. Long: the reconciler is waiting for
    /// the world (or the spec) to change, not hammering gt.
    pub hold: Duration,
    /// A working session quiet for this long is stuck.
    pub stall_threshold: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(10),
            retry: Duration::from_secs(30),
            hold: Duration::from_secs(300),
            stall_threshold: Duration::from_secs(1800),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconcileOutcome
// ---------------------------------------------------------------------------

/// Every pass ends with an explicit schedule decision; `None` means the
/// polecat has come to rest and only a resync sweep will revisit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// What one pass will do. At most one external mutating call per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Sling the spec's bead.
    Dispatch,
    /// Return the session to idle.
    Reset,
    /// Destructive cleanup, gated on a clean worktree.
    Teardown,
    /// Nothing to change; project observed state and reschedule.
    Observe,
    /// Retired is absorbing.
    Finished,
}

/// The full (desired, observed) transition table. Stuck deliberately does
/// not dispatch: recovery runs through the explicit reset path.
pub fn decide(desired: DesiredPhase, phase: Phase) -> Action {
    match (desired, phase) {
        (_, Phase::Retired) => Action::Finished,
        (DesiredPhase::Retired, _) => Action::Teardown,
        (DesiredPhase::Working, Phase::Pending | Phase::Idle) => Action::Dispatch,
        (DesiredPhase::Working, Phase::Working | Phase::Stuck) => Action::Observe,
        (DesiredPhase::Idle, Phase::Working | Phase::Stuck) => Action::Reset,
        (DesiredPhase::Idle, Phase::Pending | Phase::Idle) => Action::Observe,
    }
}

// ---------------------------------------------------------------------------
// PolecatReconciler
// ---------------------------------------------------------------------------

/// Per-polecat state machine.
///
/// One pass reads the declared spec, observes gt through the client,
/// performs at most one mutating call, persists the status, and returns a
/// schedule decision. It never returns an error: every failure becomes a
/// `Ready=False` condition plus an explicit requeue, so a polecat can go
/// wrong but cannot go silent.
pub struct PolecatReconciler {
    client: Arc<dyn GtClient>,
    specs: Arc<SpecRegistry>,
    status: Arc<dyn StatusSink>,
    intervals: Intervals,
}

impl PolecatReconciler {
    pub fn new(
        client: Arc<dyn GtClient>,
        specs: Arc<SpecRegistry>,
        status: Arc<dyn StatusSink>,
        intervals: Intervals,
    ) -> Self {
        Self {
            client,
            specs,
            status,
            intervals,
        }
    }

    /// Run one reconciliation pass for `name`.
    pub async fn reconcile(&self, name: &str) -> ReconcileOutcome {
        let Some(spec) = self.specs.get(name) else {
            return self.finalize_removed(name).await;
        };

        let mut status = match self.status.get(name).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                debug!(polecat = %name, "first sight, creating status");
                PolecatStatus::new()
            }
            Err(e) => {
                warn!(polecat = %name, error = %e, "status read failed");
                return ReconcileOutcome::after(self.intervals.retry);
            }
        };
        status.rig = spec.rig.clone();

        // Observation path: runs on every pass once a session exists,
        // independent of the phase decision below.
        let mut observed = None;
        if status.session.is_some() {
            match self.client.polecat_status(&spec.rig, &spec.name).await {
                Ok(session_status) => {
                    project(&mut status, &session_status);
                    observed = Some(session_status);
                }
                Err(e) => {
                    return self
                        .fail(&spec.name, status, reason::STATUS_SYNC_FAILED, e)
                        .await;
                }
            }
        }
        self.detect_stall(&spec, &mut status, observed.as_ref());

        match decide(spec.desired_phase, status.phase) {
            Action::Dispatch => self.dispatch(&spec, status).await,
            Action::Reset => self.reset(&spec, status).await,
            Action::Teardown => self.teardown(&spec, status, observed.as_ref()).await,
            Action::Observe => self.observe(&spec, status).await,
            Action::Finished => {
                self.persist(&spec.name, status).await;
                ReconcileOutcome::done()
            }
        }
    }

    // ----- transitions -----

    async fn dispatch(&self, spec: &PolecatSpec, status: PolecatStatus) -> ReconcileOutcome {
        if spec.bead_id.is_empty() {
            let err = GtError::Validation(format!(
                "polecat {} wants to work but declares no bead",
                spec.name
            ));
            return self
                .fail(&spec.name, status, reason::INVALID_SPEC, err)
                .await;
        }

        let mut status = status;
        match self
            .client
            .sling(&spec.bead_id, &spec.rig, &spec.name)
            .await
        {
            Ok(receipt) => {
                let from = status.phase;
                status.phase = Phase::Working;
                status.session = Some(receipt.session.clone());
                status.last_error = None;
                status.set_condition(
                    ConditionType::Ready,
                    true,
                    reason::DISPATCHED,
                    format!("bead {} slung to session {}", receipt.bead, receipt.session),
                );
                info!(
                    polecat = %spec.name,
                    from = %from,
                    session = %receipt.session,
                    "polecat dispatched"
                );
                self.persist(&spec.name, status).await;
                ReconcileOutcome::after(self.intervals.poll)
            }
            Err(e) => {
                self.fail(&spec.name, status, reason::DISPATCH_FAILED, e)
                    .await
            }
        }
    }

    async fn reset(&self, spec: &PolecatSpec, mut status: PolecatStatus) -> ReconcileOutcome {
        match self.client.reset_polecat(&spec.rig, &spec.name).await {
            Ok(()) => {
                let from = status.phase;
                status.phase = Phase::Idle;
                status.session_active = Some(false);
                status.last_error = None;
                status.set_condition(
                    ConditionType::Ready,
                    true,
                    reason::RESET,
                    "session returned to idle",
                );
                info!(polecat = %spec.name, from = %from, "polecat reset");
                self.persist(&spec.name, status).await;
                ReconcileOutcome::after(self.intervals.poll)
            }
            // The correctness-critical branch: a failed reset must leave a
            // False condition and a scheduled retry, never a stale Working
            // status that nothing will revisit.
            Err(e) => self.fail(&spec.name, status, reason::RESET_FAILED, e).await,
        }
    }

    async fn teardown(
        &self,
        spec: &PolecatSpec,
        mut status: PolecatStatus,
        observed: Option<&PolecatSessionStatus>,
    ) -> ReconcileOutcome {
        if let Some(obs) = observed {
            if obs.dirty {
                warn!(polecat = %spec.name, "refusing teardown, worktree has uncommitted work");
                status.set_condition(
                    ConditionType::Ready,
                    false,
                    reason::UNCOMMITTED_WORK,
                    "uncommitted work in worktree, refusing teardown",
                );
                self.persist(&spec.name, status).await;
                return ReconcileOutcome::after(self.intervals.retry);
            }
        }

        if status.session.is_none() {
            // Never dispatched; nothing external to tear down.
            status.phase = Phase::Retired;
            status.set_condition(ConditionType::Ready, true, reason::RETIRED, "never dispatched");
            self.persist(&spec.name, status).await;
            return ReconcileOutcome::done();
        }

        match self.client.nuke_polecat(&spec.rig, &spec.name, false).await {
            Ok(()) => {
                status.phase = Phase::Retired;
                status.session_active = Some(false);
                status.last_error = None;
                status.set_condition(
                    ConditionType::Ready,
                    true,
                    reason::RETIRED,
                    "session torn down",
                );
                info!(polecat = %spec.name, "polecat retired");
                self.persist(&spec.name, status).await;
                ReconcileOutcome::done()
            }
            Err(e) => {
                self.fail(&spec.name, status, reason::TEARDOWN_FAILED, e)
                    .await
            }
        }
    }

    async fn observe(&self, spec: &PolecatSpec, mut status: PolecatStatus) -> ReconcileOutcome {
        if status.phase == Phase::Pending {
            // Nothing is desired and nothing exists. That is idle.
            status.phase = Phase::Idle;
        }
        if status.condition(ConditionType::Ready).is_none() {
            status.set_condition(ConditionType::Ready, true, reason::IDLE, "no change required");
        }
        self.persist(&spec.name, status).await;
        ReconcileOutcome::after(self.intervals.poll)
    }

    /// The spec is gone: best-effort teardown, then drop the status.
    async fn finalize_removed(&self, name: &str) -> ReconcileOutcome {
        if let Ok(Some(status)) = self.status.get(name).await {
            if status.phase != Phase::Retired && status.session.is_some() {
                if let Err(e) = self.client.nuke_polecat(&status.rig, name, false).await {
                    warn!(polecat = %name, error = %e, "best-effort teardown failed");
                }
            }
            if let Err(e) = self.status.remove(name).await {
                warn!(polecat = %name, error = %e, "failed to remove status");
                return ReconcileOutcome::after(self.intervals.retry);
            }
            info!(polecat = %name, "status removed after spec deletion");
        }
        ReconcileOutcome::done()
    }

    // ----- failure policy -----

    /// Single funnel for every failed external call: persist a `Ready=False`
    /// condition carrying the wrapped error, then decide the schedule from
    /// the error class. Errors are never merely logged.
    async fn fail(
        &self,
        name: &str,
        mut status: PolecatStatus,
        why: &str,
        err: GtError,
    ) -> ReconcileOutcome {
        warn!(polecat = %name, reason = %why, error = %err, "reconcile pass failed");
        status.last_error = Some(err.to_string());
        status.set_condition(ConditionType::Ready, false, why, err.to_string());
        self.persist(name, status).await;

        if err.is_retryable() {
            ReconcileOutcome::after(self.intervals.retry)
        } else {
            ReconcileOutcome::after(self.intervals.hold)
        }
    }

    fn detect_stall(
        &self,
        spec: &PolecatSpec,
        status: &mut PolecatStatus,
        observed: Option<&PolecatSessionStatus>,
    ) {
        let Some(obs) = observed else { return };
        if status.phase != Phase::Working {
            return;
        }

        let quiet_too_long = obs
            .last_activity
            .map(|at| {
                Utc::now()
                    .signed_duration_since(at)
                    .to_std()
                    .map(|quiet| quiet >= self.intervals.stall_threshold)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if obs.state == "stuck" || quiet_too_long {
            warn!(polecat = %spec.name, gt_state = %obs.state, "working session is stuck");
            status.phase = Phase::Stuck;
            status.set_condition(
                ConditionType::Ready,
                false,
                reason::STALLED,
                "session reported stuck or went quiet past the stall threshold",
            );
        }
    }

    async fn persist(&self, name: &str, status: PolecatStatus) {
        if let Err(e) = self.status.persist(name, status).await {
            warn!(polecat = %name, error = %e, "failed to persist status");
        }
    }
}

/// Project the externally observed sub-fields into the status. Runs on
/// every pass with a live session, independent of the phase decision.
fn project(status: &mut PolecatStatus, obs: &PolecatSessionStatus) {
    if let Some(session) = &obs.session {
        status.session = Some(session.clone());
    }
    status.branch = obs.branch.clone();
    status.session_active = Some(obs.active);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_working_paths() {
        assert_eq!(decide(DesiredPhase::Working, Phase::Pending), Action::Dispatch);
        assert_eq!(decide(DesiredPhase::Working, Phase::Idle), Action::Dispatch);
        assert_eq!(decide(DesiredPhase::Working, Phase::Working), Action::Observe);
        assert_eq!(decide(DesiredPhase::Idle, Phase::Working), Action::Reset);
        assert_eq!(decide(DesiredPhase::Idle, Phase::Stuck), Action::Reset);
        assert_eq!(decide(DesiredPhase::Idle, Phase::Idle), Action::Observe);
    }

    #[test]
    fn stuck_never_dispatches() {
        assert_eq!(decide(DesiredPhase::Working, Phase::Stuck), Action::Observe);
    }

    #[test]
    fn retired_is_absorbing_in_the_table() {
        for desired in [DesiredPhase::Idle, DesiredPhase::Working, DesiredPhase::Retired] {
            assert_eq!(decide(desired, Phase::Retired), Action::Finished);
        }
    }

    #[test]
    fn teardown_wins_over_everything_else() {
        for phase in [Phase::Pending, Phase::Working, Phase::Idle, Phase::Stuck] {
            assert_eq!(decide(DesiredPhase::Retired, phase), Action::Teardown);
        }
    }
}
