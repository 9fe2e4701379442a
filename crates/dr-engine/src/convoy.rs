use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use dr_client::client::GtClient;
use dr_core::registry::SpecRegistry;
use dr_core::status_store::StatusSink;
use dr_core::types::{ConvoyView, Phase};

use crate::reconciler::ReconcileOutcome;

// ---------------------------------------------------------------------------
// ConvoyAggregator
// ---------------------------------------------------------------------------

/// Rolls polecat statuses up into convoy views and sends exactly one
/// completion mail when a convoy comes to rest.
///
/// Reads only reconciler output (specs and the status store); its single
/// external side effect is the gt mail, made at-most-once by the
/// `notified` marker. Views are re-derived every pass and never cached, so
/// a mix of in-flight and settled member statuses is fine.
pub struct ConvoyAggregator {
    client: Arc<dyn GtClient>,
    specs: Arc<SpecRegistry>,
    status: Arc<dyn StatusSink>,
    notify_address: String,
    poll: Duration,
    notified: DashMap<String, DateTime<Utc>>,
}

impl ConvoyAggregator {
    pub fn new(
        client: Arc<dyn GtClient>,
        specs: Arc<SpecRegistry>,
        status: Arc<dyn StatusSink>,
        notify_address: impl Into<String>,
        poll: Duration,
    ) -> Self {
        Self {
            client,
            specs,
            status,
            notify_address: notify_address.into(),
            poll,
            notified: DashMap::new(),
        }
    }

    /// Derive the current view of one convoy.
    pub async fn view(&self, convoy_id: &str) -> ConvoyView {
        let mut view = ConvoyView {
            convoy_id: convoy_id.to_string(),
            total: 0,
            succeeded: 0,
            failed: 0,
            running: 0,
            members: Vec::new(),
        };

        let mut members: Vec<String> = self
            .specs
            .names()
            .into_iter()
            .filter(|name| {
                self.specs
                    .get(name)
                    .and_then(|spec| spec.convoy_id)
                    .is_some_and(|id| id == convoy_id)
            })
            .collect();
        members.sort();

        for name in members {
            view.total += 1;
            let phase = match self.status.get(&name).await {
                Ok(Some(status)) => status.phase,
                // Not reconciled yet, or the store hiccuped: count as
                // running, never as settled.
                Ok(None) => Phase::Pending,
                Err(e) => {
                    warn!(polecat = %name, error = %e, "status read failed during aggregation");
                    Phase::Pending
                }
            };
            match phase {
                Phase::Retired => view.succeeded += 1,
                Phase::Stuck => view.failed += 1,
                Phase::Pending | Phase::Working | Phase::Idle => view.running += 1,
            }
            view.members.push(name);
        }

        view
    }

    /// Run one aggregation pass for `convoy_id`.
    pub async fn reconcile(&self, convoy_id: &str) -> ReconcileOutcome {
        let view = self.view(convoy_id).await;
        debug!(
            convoy = %convoy_id,
            total = view.total,
            succeeded = view.succeeded,
            failed = view.failed,
            running = view.running,
            "convoy view derived"
        );

        if !view.is_terminal() {
            return ReconcileOutcome::after(self.poll);
        }

        if self.notified.contains_key(convoy_id) {
            // Already announced; stop rescheduling on a tight interval.
            return ReconcileOutcome::done();
        }

        let subject = format!("convoy {convoy_id} complete");
        let body = format!(
            "{} polecats: {} succeeded, {} failed",
            view.total, view.succeeded, view.failed
        );
        match self
            .client
            .send_mail(&self.notify_address, &subject, &body)
            .await
        {
            Ok(()) => {
                self.notified.insert(convoy_id.to_string(), Utc::now());
                info!(convoy = %convoy_id, to = %self.notify_address, "completion mail sent");
                ReconcileOutcome::done()
            }
            Err(e) => {
                // Marker intentionally not set: the mail has not happened,
                // so the next pass tries again.
                warn!(convoy = %convoy_id, error = %e, "completion mail failed");
                ReconcileOutcome::after(self.poll)
            }
        }
    }

    /// When the completion mail for `convoy_id` went out, if it has.
    pub fn notified_at(&self, convoy_id: &str) -> Option<DateTime<Utc>> {
        self.notified.get(convoy_id).map(|entry| *entry.value())
    }
}
