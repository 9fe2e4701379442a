use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dr_harness::error::Result;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One row of `gt polecat list --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolecatSummary {
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub state: String,
}

/// Output of `gt polecat status --json`; the externally observed sub-fields
/// the reconciler projects into status on every pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolecatSessionStatus {
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub active: bool,
    /// Uncommitted work in the polecat's worktree. Blocks teardown.
    #[serde(default)]
    pub dirty: bool,
    /// gt's own lifecycle word for the session ("working", "idle", "stuck").
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Output of `gt sling --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlingReceipt {
    pub session: String,
    pub bead: String,
}

/// Output of `gt convoy create --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyReceipt {
    pub id: String,
}

/// One row of `gt convoy list --json` / output of `gt convoy status --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyInfo {
    pub id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub beads: Vec<String>,
    #[serde(default)]
    pub state: String,
}

/// Output of `gt hook status --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookStatus {
    #[serde(default)]
    pub bead: Option<String>,
    #[serde(default)]
    pub attached_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// GtClient
// ---------------------------------------------------------------------------

/// Operation-oriented boundary to the gt CLI.
///
/// One concrete production implementation exists
/// ([`crate::subprocess::SubprocessGtClient`]) plus an in-memory fake with
/// per-operation override hooks ([`crate::fake::FakeGtClient`]). The
/// reconciler depends only on this trait.
#[async_trait]
pub trait GtClient: Send + Sync {
    async fn list_polecats(&self, rig: &str) -> Result<Vec<PolecatSummary>>;

    async fn polecat_status(&self, rig: &str, name: &str) -> Result<PolecatSessionStatus>;

    /// Dispatch a bead to a polecat. The receipt carries the session handle.
    async fn sling(&self, bead: &str, rig: &str, name: &str) -> Result<SlingReceipt>;

    /// Return a working polecat to idle.
    async fn reset_polecat(&self, rig: &str, name: &str) -> Result<()>;

    /// Destructive teardown. `force` skips gt's own safety checks.
    async fn nuke_polecat(&self, rig: &str, name: &str, force: bool) -> Result<()>;

    async fn create_convoy(&self, notes: &str, beads: &[String]) -> Result<ConvoyReceipt>;

    async fn convoy_status(&self, id: &str) -> Result<ConvoyInfo>;

    async fn list_convoys(&self) -> Result<Vec<ConvoyInfo>>;

    /// Hand a bead to a polecat's hook without slinging a session.
    async fn attach_hook(&self, rig: &str, name: &str, bead: &str) -> Result<()>;

    async fn hook_status(&self, rig: &str, name: &str) -> Result<HookStatus>;

    /// Send a gt mail message. The convoy aggregator's only side effect.
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<()>;

    /// Whether a polecat exists in the rig.
    ///
    /// Implemented as a scan over `list_polecats`: gt has no point query,
    /// and the extra round trip is accepted over guessing from status
    /// errors.
    async fn polecat_exists(&self, rig: &str, name: &str) -> Result<bool> {
        let polecats = self.list_polecats(rig).await?;
        Ok(polecats.iter().any(|p| p.name == name))
    }
}
