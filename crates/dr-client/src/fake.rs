use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use dr_harness::error::Result;

use crate::client::{
    ConvoyInfo, ConvoyReceipt, GtClient, HookStatus, PolecatSessionStatus, PolecatSummary,
    SlingReceipt,
};

type Hook<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

// ---------------------------------------------------------------------------
// FakeGtClient
// ---------------------------------------------------------------------------

/// In-memory gt for tests.
///
/// Default behaviour is a well-behaved gt: slings hand out fresh session
/// handles, resets and nukes succeed, statuses come from an internal map.
/// Each operation has an override hook that replaces the default, which is
/// how tests inject failures ("reset times out", "mail is down") without a
/// subprocess anywhere. Every call is recorded for assertion.
#[derive(Default)]
pub struct FakeGtClient {
    calls: Mutex<Vec<String>>,
    polecats: Mutex<Vec<PolecatSummary>>,
    statuses: Mutex<HashMap<String, PolecatSessionStatus>>,
    convoys: Mutex<Vec<ConvoyInfo>>,
    hooks: Mutex<HashMap<String, HookStatus>>,
    mails: Mutex<Vec<(String, String, String)>>,
    sling_counter: AtomicU64,

    sling_hook: Mutex<Option<Hook<SlingReceipt>>>,
    reset_hook: Mutex<Option<Hook<()>>>,
    nuke_hook: Mutex<Option<Hook<()>>>,
    status_hook: Mutex<Option<Hook<PolecatSessionStatus>>>,
    list_hook: Mutex<Option<Hook<Vec<PolecatSummary>>>>,
    mail_hook: Mutex<Option<Hook<()>>>,
}

impl FakeGtClient {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- seeding -----

    pub fn insert_polecat(&self, summary: PolecatSummary) {
        self.polecats.lock().unwrap().push(summary);
    }

    pub fn insert_status(&self, status: PolecatSessionStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(status.name.clone(), status);
    }

    // ----- override hooks -----

    pub fn set_sling_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<SlingReceipt> + Send + Sync + 'static,
    {
        *self.sling_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_reset_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        *self.reset_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_nuke_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        *self.nuke_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_status_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<PolecatSessionStatus> + Send + Sync + 'static,
    {
        *self.status_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_list_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<Vec<PolecatSummary>> + Send + Sync + 'static,
    {
        *self.list_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_mail_hook<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        *self.mail_hook.lock().unwrap() = Some(Box::new(f));
    }

    // ----- assertions -----

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose description starts with `prefix`,
    /// e.g. `count_calls("sling")` or `count_calls("mail")`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn sent_mails(&self) -> Vec<(String, String, String)> {
        self.mails.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GtClient for FakeGtClient {
    async fn list_polecats(&self, rig: &str) -> Result<Vec<PolecatSummary>> {
        self.record(format!("list_polecats {rig}"));
        if let Some(hook) = self.list_hook.lock().unwrap().as_ref() {
            return hook();
        }
        Ok(self.polecats.lock().unwrap().clone())
    }

    async fn polecat_status(&self, rig: &str, name: &str) -> Result<PolecatSessionStatus> {
        self.record(format!("polecat_status {rig} {name}"));
        if let Some(hook) = self.status_hook.lock().unwrap().as_ref() {
            return hook();
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| PolecatSessionStatus {
                name: name.to_string(),
                session: None,
                branch: None,
                active: false,
                dirty: false,
                state: "idle".to_string(),
                last_activity: None,
            }))
    }

    async fn sling(&self, bead: &str, rig: &str, name: &str) -> Result<SlingReceipt> {
        self.record(format!("sling {bead} {rig} {name}"));
        if let Some(hook) = self.sling_hook.lock().unwrap().as_ref() {
            return hook();
        }
        let n = self.sling_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session = format!("gt-sess-{n}");
        self.statuses.lock().unwrap().insert(
            name.to_string(),
            PolecatSessionStatus {
                name: name.to_string(),
                session: Some(session.clone()),
                branch: Some(format!("polecat/{name}")),
                active: true,
                dirty: false,
                state: "working".to_string(),
                last_activity: Some(chrono::Utc::now()),
            },
        );
        Ok(SlingReceipt {
            session,
            bead: bead.to_string(),
        })
    }

    async fn reset_polecat(&self, rig: &str, name: &str) -> Result<()> {
        self.record(format!("reset_polecat {rig} {name}"));
        if let Some(hook) = self.reset_hook.lock().unwrap().as_ref() {
            return hook();
        }
        if let Some(status) = self.statuses.lock().unwrap().get_mut(name) {
            status.active = false;
            status.dirty = false;
            status.state = "idle".to_string();
        }
        Ok(())
    }

    async fn nuke_polecat(&self, rig: &str, name: &str, force: bool) -> Result<()> {
        self.record(format!("nuke_polecat {rig} {name} force={force}"));
        if let Some(hook) = self.nuke_hook.lock().unwrap().as_ref() {
            return hook();
        }
        self.statuses.lock().unwrap().remove(name);
        self.polecats.lock().unwrap().retain(|p| p.name != name);
        Ok(())
    }

    async fn create_convoy(&self, notes: &str, beads: &[String]) -> Result<ConvoyReceipt> {
        self.record(format!("create_convoy {notes}"));
        let id = format!("cv-{}", self.convoys.lock().unwrap().len() + 1);
        self.convoys.lock().unwrap().push(ConvoyInfo {
            id: id.clone(),
            notes: notes.to_string(),
            beads: beads.to_vec(),
            state: "running".to_string(),
        });
        Ok(ConvoyReceipt { id })
    }

    async fn convoy_status(&self, id: &str) -> Result<ConvoyInfo> {
        self.record(format!("convoy_status {id}"));
        Ok(self
            .convoys
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .unwrap_or_else(|| ConvoyInfo {
                id: id.to_string(),
                notes: String::new(),
                beads: Vec::new(),
                state: "unknown".to_string(),
            }))
    }

    async fn list_convoys(&self) -> Result<Vec<ConvoyInfo>> {
        self.record("list_convoys".to_string());
        Ok(self.convoys.lock().unwrap().clone())
    }

    async fn attach_hook(&self, rig: &str, name: &str, bead: &str) -> Result<()> {
        self.record(format!("attach_hook {rig} {name} {bead}"));
        self.hooks.lock().unwrap().insert(
            name.to_string(),
            HookStatus {
                bead: Some(bead.to_string()),
                attached_at: Some(chrono::Utc::now()),
            },
        );
        Ok(())
    }

    async fn hook_status(&self, rig: &str, name: &str) -> Result<HookStatus> {
        self.record(format!("hook_status {rig} {name}"));
        Ok(self
            .hooks
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(HookStatus {
                bead: None,
                attached_at: None,
            }))
    }

    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.record(format!("mail {to}"));
        if let Some(hook) = self.mail_hook.lock().unwrap().as_ref() {
            return hook();
        }
        self.mails
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
