pub mod client;
pub mod fake;
pub mod subprocess;

pub use client::{
    ConvoyInfo, ConvoyReceipt, GtClient, HookStatus, PolecatSessionStatus, PolecatSummary,
    SlingReceipt,
};
pub use fake::FakeGtClient;
pub use subprocess::SubprocessGtClient;
