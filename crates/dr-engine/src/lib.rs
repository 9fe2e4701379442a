pub mod convoy;
pub mod engine;
pub mod queue;
pub mod reconciler;

pub use engine::{convoy_key, polecat_key, Engine};
pub use queue::{QueueHandler, WorkQueue};
pub use reconciler::{decide, Action, Intervals, PolecatReconciler, ReconcileOutcome};
