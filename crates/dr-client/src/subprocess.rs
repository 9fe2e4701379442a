use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use dr_harness::error::{GtError, Result};
use dr_harness::invoker::GtInvoker;

use crate::client::{
    ConvoyInfo, ConvoyReceipt, GtClient, HookStatus, PolecatSessionStatus, PolecatSummary,
    SlingReceipt,
};

// ---------------------------------------------------------------------------
// SubprocessGtClient
// ---------------------------------------------------------------------------

/// Production client: every operation is one gt invocation with a fixed
/// argument template, run through the invoker (and therefore through the
/// circuit breaker).
///
/// JSON decoding happens here, above the invoker, so a malformed payload is
/// a [`GtError::Parse`] and never counts as a breaker failure: the external
/// call itself succeeded.
#[derive(Debug, Clone)]
pub struct SubprocessGtClient {
    invoker: GtInvoker,
}

impl SubprocessGtClient {
    pub fn new(invoker: GtInvoker) -> Self {
        Self { invoker }
    }

    async fn invoke_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let raw = self.invoker.invoke(args).await?;
        decode(&raw)
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw.trim()).map_err(|e| {
        let mut preview = raw.trim().to_string();
        if preview.len() > 200 {
            preview.truncate(200);
            preview.push_str("...");
        }
        GtError::Parse(format!("{e}; output was: {preview}"))
    })
}

#[async_trait]
impl GtClient for SubprocessGtClient {
    async fn list_polecats(&self, rig: &str) -> Result<Vec<PolecatSummary>> {
        self.invoke_json(&["polecat", "list", "--rig", rig, "--json"])
            .await
    }

    async fn polecat_status(&self, rig: &str, name: &str) -> Result<PolecatSessionStatus> {
        self.invoke_json(&["polecat", "status", name, "--rig", rig, "--json"])
            .await
    }

    async fn sling(&self, bead: &str, rig: &str, name: &str) -> Result<SlingReceipt> {
        debug!(bead = %bead, rig = %rig, polecat = %name, "slinging bead");
        self.invoke_json(&["sling", bead, "--rig", rig, "--polecat", name, "--json"])
            .await
    }

    async fn reset_polecat(&self, rig: &str, name: &str) -> Result<()> {
        self.invoker
            .invoke(&["polecat", "reset", name, "--rig", rig])
            .await?;
        Ok(())
    }

    async fn nuke_polecat(&self, rig: &str, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["polecat", "nuke", name, "--rig", rig];
        if force {
            args.push("--force");
        }
        self.invoker.invoke(&args).await?;
        Ok(())
    }

    async fn create_convoy(&self, notes: &str, beads: &[String]) -> Result<ConvoyReceipt> {
        let mut args = vec!["convoy", "create", "--notes", notes, "--json"];
        for bead in beads {
            args.push(bead.as_str());
        }
        self.invoke_json(&args).await
    }

    async fn convoy_status(&self, id: &str) -> Result<ConvoyInfo> {
        self.invoke_json(&["convoy", "status", id, "--json"]).await
    }

    async fn list_convoys(&self) -> Result<Vec<ConvoyInfo>> {
        self.invoke_json(&["convoy", "list", "--json"]).await
    }

    async fn attach_hook(&self, rig: &str, name: &str, bead: &str) -> Result<()> {
        self.invoker
            .invoke(&["hook", "attach", bead, "--rig", rig, "--polecat", name])
            .await?;
        Ok(())
    }

    async fn hook_status(&self, rig: &str, name: &str) -> Result<HookStatus> {
        self.invoke_json(&["hook", "status", "--rig", rig, "--polecat", name, "--json"])
            .await
    }

    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.invoker
            .invoke(&["mail", "send", "--to", to, "--subject", subject, body])
            .await?;
        Ok(())
    }
}
