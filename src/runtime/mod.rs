//! Runtime Module - graph execution
//!
//! Contains the execution components:
//! - `runner`: pull-based graph execution with tokio concurrency
//! - `batch`: batch barrier for collection elements
//! - `choose`: OR branch ordering strategies
//! - `entity`: per-run entity tree with idempotent write-back
//! - `extension`: enter/leave seams around every side effect
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `plan` module.

mod batch;
mod choose;
mod entity;
mod extension;
mod runner;

pub use batch::{BatchBarrier, BatchHandle, BatchReply};
pub use choose::{PathChooser, PlannedOrder, PriorityChooser};
pub use entity::{merge_value, EntityStore};
pub use extension::{Extension, Extensions};
pub use runner::{run, RunConfig, RunOutput, Runner, MUTATION_NODE};
