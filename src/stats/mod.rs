//! Stats Module - run records and diagnostics
//!
//! - `record`: RunStats, NodeRun, MutationRun (per-run side channel)
//! - `classify`: attribute outcome classification (Direct / Ancestor / ...)

mod classify;
mod record;

pub use classify::{classify, Outcome};
pub use record::{MutationRun, NodeRun, NodeStatus, RunStats};
