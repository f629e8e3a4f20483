//! Plan Module - execution graph construction
//!
//! - `graph`: ExecutionGraph, Node (resolver / AND / OR), validation
//! - `planner`: backward-chaining `plan` over an Index
//! - `cache`: PlanCache keyed by request and known-shape fingerprints
//!
//! Graphs are immutable once built and can be shared across runs.

mod cache;
mod graph;
mod planner;

pub use cache::PlanCache;
pub use graph::{AndNode, ExecutionGraph, Node, NodeId, NodeVec, OrNode, ResolverNode};
pub use planner::{plan, plan_with, PlanOptions, DEFAULT_MAX_NESTED_DEPTH};
