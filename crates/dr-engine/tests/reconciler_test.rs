use std::sync::Arc;
use std::time::Duration;

use dr_client::client::PolecatSessionStatus;
use dr_client::{FakeGtClient, GtClient};
use dr_core::registry::SpecRegistry;
use dr_core::status_store::{MemoryStatusStore, StatusSink};
use dr_core::types::{
    reason, ConditionType, DesiredPhase, Phase, PolecatSpec, PolecatStatus,
};
use dr_engine::{Intervals, PolecatReconciler};
use dr_harness::error::GtError;

struct Harness {
    gt: Arc<FakeGtClient>,
    specs: Arc<SpecRegistry>,
    store: Arc<MemoryStatusStore>,
    reconciler: PolecatReconciler,
}

fn harness() -> Harness {
    let gt = Arc::new(FakeGtClient::new());
    let specs = Arc::new(SpecRegistry::new());
    let store = Arc::new(MemoryStatusStore::new());
    let gt_client: Arc<dyn GtClient> = gt.clone();
    let store_sink: Arc<dyn StatusSink> = store.clone();
    let reconciler = PolecatReconciler::new(
        gt_client,
        Arc::clone(&specs),
        store_sink,
        Intervals::default(),
    );
    Harness {
        gt,
        specs,
        store,
        reconciler,
    }
}

/// Seed a polecat that is already mid-work: Working status with a live
/// session on both sides of the boundary.
async fn seed_working(h: &Harness, name: &str) {
    let mut status = PolecatStatus::new();
    status.phase = Phase::Working;
    status.rig = "citadel".into();
    status.session = Some("gt-sess-1".into());
    h.store.persist(name, status).await.unwrap();

    h.gt.insert_status(PolecatSessionStatus {
        name: name.into(),
        session: Some("gt-sess-1".into()),
        branch: Some(format!("polecat/{name}")),
        active: true,
        dirty: false,
        state: "working".into(),
        last_activity: Some(chrono::Utc::now()),
    });
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_moves_pending_to_working() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Working);
    assert!(status.session.is_some());
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(ready.status);
    assert_eq!(ready.reason, reason::DISPATCHED);
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(10)));
    assert_eq!(h.gt.count_calls("sling"), 1);
}

#[tokio::test]
async fn dispatch_failure_keeps_phase_and_schedules_retry() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    h.gt.set_sling_hook(|| {
        Err(GtError::Tool {
            command: "gt sling".into(),
            stderr: "no free session slot".into(),
        })
    });

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Pending);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::DISPATCH_FAILED);
    assert!(ready.message.contains("no free session slot"));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn dispatch_without_bead_is_held_not_hammered() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Working));

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::INVALID_SPEC);
    // Scheduled, but on the long hold interval: only a spec change can fix
    // this, so the tight retry schedule would be noise.
    let requeue = outcome.requeue_after.unwrap();
    assert!(requeue > Duration::from_secs(30));
    assert_eq!(h.gt.count_calls("sling"), 0);
}

#[tokio::test]
async fn transient_dispatch_failure_retries() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    h.gt.set_sling_hook(|| {
        Err(GtError::Timeout {
            command: "gt sling".into(),
            timeout: Duration::from_secs(30),
        })
    });

    let outcome = h.reconciler.reconcile("nux").await;
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Pending);
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_moves_working_to_idle() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Idle));
    seed_working(&h, "nux").await;

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Idle);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(ready.status);
    assert_eq!(ready.reason, reason::RESET);
    assert!(outcome.requeue_after.is_some());
    assert_eq!(h.gt.count_calls("reset_polecat"), 1);
}

// A failed reset must never leave a stale Working status with nothing
// scheduled to revisit it.
#[tokio::test]
async fn reset_failure_escalates_and_schedules_retry() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Idle));
    seed_working(&h, "nux").await;
    h.gt.set_reset_hook(|| {
        Err(GtError::Tool {
            command: "gt polecat reset".into(),
            stderr: "timeout".into(),
        })
    });

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    // No false advancement.
    assert_eq!(status.phase, Phase::Working);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::RESET_FAILED);
    assert!(ready.message.contains("timeout"));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn stuck_recovers_through_reset() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Idle));

    let mut status = PolecatStatus::new();
    status.phase = Phase::Stuck;
    status.rig = "citadel".into();
    status.session = Some("gt-sess-1".into());
    h.store.persist("nux", status).await.unwrap();
    h.gt.insert_status(PolecatSessionStatus {
        name: "nux".into(),
        session: Some("gt-sess-1".into()),
        branch: None,
        active: false,
        dirty: false,
        state: "stuck".into(),
        last_activity: None,
    });

    h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(h.gt.count_calls("reset_polecat"), 1);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn teardown_refuses_uncommitted_work() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Retired));
    seed_working(&h, "nux").await;
    h.gt.insert_status(PolecatSessionStatus {
        name: "nux".into(),
        session: Some("gt-sess-1".into()),
        branch: None,
        active: true,
        dirty: true,
        state: "working".into(),
        last_activity: Some(chrono::Utc::now()),
    });

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_ne!(status.phase, Phase::Retired);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::UNCOMMITTED_WORK);
    assert!(outcome.requeue_after.is_some());
    // The destructive call must not have happened.
    assert_eq!(h.gt.count_calls("nuke_polecat"), 0);
}

#[tokio::test]
async fn teardown_retires_clean_polecat() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Retired));
    seed_working(&h, "nux").await;

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Retired);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(ready.status);
    assert_eq!(ready.reason, reason::RETIRED);
    // At rest: nothing schedules another pass.
    assert_eq!(outcome.requeue_after, None);
    assert_eq!(h.gt.count_calls("nuke_polecat"), 1);
}

#[tokio::test]
async fn teardown_failure_escalates_and_schedules_retry() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Retired));
    seed_working(&h, "nux").await;
    h.gt.set_nuke_hook(|| {
        Err(GtError::Tool {
            command: "gt polecat nuke".into(),
            stderr: "session busy".into(),
        })
    });

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_ne!(status.phase, Phase::Retired);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::TEARDOWN_FAILED);
    assert!(outcome.requeue_after.is_some());
}

#[tokio::test]
async fn teardown_without_session_skips_the_external_call() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Retired));

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Retired);
    assert_eq!(outcome.requeue_after, None);
    assert_eq!(h.gt.count_calls("nuke_polecat"), 0);
}

// ---------------------------------------------------------------------------
// Status sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_sync_projects_observed_fields() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    seed_working(&h, "nux").await;

    h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.branch.as_deref(), Some("polecat/nux"));
    assert_eq!(status.session_active, Some(true));
    assert_eq!(status.session.as_deref(), Some("gt-sess-1"));
}

#[tokio::test]
async fn status_sync_failure_escalates_and_schedules_retry() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    seed_working(&h, "nux").await;
    h.gt.set_status_hook(|| {
        Err(GtError::Tool {
            command: "gt polecat status".into(),
            stderr: "tmux server gone".into(),
        })
    });

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::STATUS_SYNC_FAILED);
    assert!(outcome.requeue_after.is_some());
}

#[tokio::test]
async fn stuck_session_is_detected_during_sync() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    seed_working(&h, "nux").await;
    h.gt.insert_status(PolecatSessionStatus {
        name: "nux".into(),
        session: Some("gt-sess-1".into()),
        branch: None,
        active: false,
        dirty: false,
        state: "stuck".into(),
        last_activity: None,
    });

    h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Stuck);
    let ready = status.condition(ConditionType::Ready).unwrap();
    assert!(!ready.status);
    assert_eq!(ready.reason, reason::STALLED);
    // Stuck does not re-dispatch; recovery is the reset path.
    assert_eq!(h.gt.count_calls("sling"), 0);
}

// ---------------------------------------------------------------------------
// Lifecycle edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retired_polecat_is_left_alone() {
    let h = harness();
    h.specs.declare(
        PolecatSpec::new("nux", "citadel")
            .with_desired(DesiredPhase::Working)
            .with_bead("bead-7"),
    );
    let mut status = PolecatStatus::new();
    status.phase = Phase::Retired;
    status.rig = "citadel".into();
    h.store.persist("nux", status).await.unwrap();

    let outcome = h.reconciler.reconcile("nux").await;

    assert_eq!(outcome.requeue_after, None);
    assert_eq!(h.gt.count_calls("sling"), 0);
    assert_eq!(h.gt.count_calls("reset_polecat"), 0);
}

#[tokio::test]
async fn deleted_spec_triggers_best_effort_teardown() {
    let h = harness();
    seed_working(&h, "nux").await;

    let outcome = h.reconciler.reconcile("nux").await;

    assert_eq!(outcome.requeue_after, None);
    assert_eq!(h.gt.count_calls("nuke_polecat"), 1);
    assert!(h.store.get("nux").await.unwrap().is_none());
}

#[tokio::test]
async fn deleted_spec_with_retired_status_skips_teardown() {
    let h = harness();
    let mut status = PolecatStatus::new();
    status.phase = Phase::Retired;
    status.rig = "citadel".into();
    status.session = Some("gt-sess-1".into());
    h.store.persist("nux", status).await.unwrap();

    h.reconciler.reconcile("nux").await;

    assert_eq!(h.gt.count_calls("nuke_polecat"), 0);
    assert!(h.store.get("nux").await.unwrap().is_none());
}

#[tokio::test]
async fn idle_desired_on_fresh_polecat_settles_to_idle() {
    let h = harness();
    h.specs
        .declare(PolecatSpec::new("nux", "citadel").with_desired(DesiredPhase::Idle));

    let outcome = h.reconciler.reconcile("nux").await;

    let status = h.store.get("nux").await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Idle);
    // First reconciliation always leaves a Ready condition behind.
    assert!(status.condition(ConditionType::Ready).is_some());
    assert!(outcome.requeue_after.is_some());
    assert_eq!(h.gt.count_calls("sling"), 0);
}
