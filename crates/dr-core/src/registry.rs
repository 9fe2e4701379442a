use dashmap::DashMap;
use tracing::info;

use crate::types::PolecatSpec;

// ---------------------------------------------------------------------------
// SpecRegistry
// ---------------------------------------------------------------------------

/// Declared desired state, keyed by polecat name.
///
/// The declaring actor (API layer, CLI, test) writes here; the reconciler
/// only reads. Removing a spec is the signal to tear the polecat down and
/// drop its status.
#[derive(Debug, Default)]
pub struct SpecRegistry {
    specs: DashMap<String, PolecatSpec>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self {
            specs: DashMap::new(),
        }
    }

    /// Declare or replace a spec.
    pub fn declare(&self, spec: PolecatSpec) {
        info!(polecat = %spec.name, rig = %spec.rig, desired = %spec.desired_phase, "spec declared");
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Remove a spec. Returns the removed value when it existed.
    pub fn remove(&self, name: &str) -> Option<PolecatSpec> {
        let removed = self.specs.remove(name).map(|(_, spec)| spec);
        if removed.is_some() {
            info!(polecat = %name, "spec removed");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<PolecatSpec> {
        self.specs.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Distinct convoy ids referenced by any declared spec.
    pub fn convoy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .specs
            .iter()
            .filter_map(|entry| entry.convoy_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
