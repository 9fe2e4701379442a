use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::PolecatStatus;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    #[error("status backend: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StatusStoreError>;

// ---------------------------------------------------------------------------
// StatusSink
// ---------------------------------------------------------------------------

/// Persistence boundary for observed status.
///
/// The reconciler writes through this trait and expects each write to be
/// atomic with respect to concurrent readers. Durable backends live outside
/// this crate; the in-memory store below is the default and the test seam.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn persist(&self, name: &str, status: PolecatStatus) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<PolecatStatus>>;
    async fn list(&self) -> Result<Vec<(String, PolecatStatus)>>;
    async fn remove(&self, name: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryStatusStore
// ---------------------------------------------------------------------------

/// DashMap-backed status store. Each `persist` replaces the whole status
/// snapshot, so readers never observe a half-written update.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    inner: DashMap<String, PolecatStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

#[async_trait]
impl StatusSink for MemoryStatusStore {
    async fn persist(&self, name: &str, status: PolecatStatus) -> Result<()> {
        self.inner.insert(name.to_string(), status);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<PolecatStatus>> {
        Ok(self.inner.get(name).map(|entry| entry.clone()))
    }

    async fn list(&self) -> Result<Vec<(String, PolecatStatus)>> {
        Ok(self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.inner.remove(name);
        Ok(())
    }
}
