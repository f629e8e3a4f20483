//! Outcome classification - attribute-level view of node records
//!
//! Walks backward from an attribute's source node through predecessors and
//! branches until it finds the failure that explains a missing value.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::GraphError;
use crate::plan::{ExecutionGraph, Node, NodeId};

use super::record::{NodeStatus, RunStats};

/// What happened to one requested attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Value present (produced this run or already known)
    Resolved,
    /// The attribute's own node recorded an error
    Direct {
        node: NodeId,
        #[serde(serialize_with = "serialize_error")]
        error: GraphError,
    },
    /// An upstream dependency failed
    Ancestor {
        node: NodeId,
        #[serde(serialize_with = "serialize_error")]
        error: GraphError,
    },
    /// No resolver path existed
    Unreachable,
    /// Ran cleanly without producing the attribute
    Omitted { node: NodeId },
}

fn serialize_error<S: serde::Serializer>(error: &GraphError, serializer: S) -> Result<S::Ok, S::Error> {
    serde_json::json!({ "code": error.code(), "message": error.to_string() }).serialize(serializer)
}

impl Outcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved)
    }

    /// Node carrying the explaining error, if any
    pub fn failed_node(&self) -> Option<NodeId> {
        match self {
            Outcome::Direct { node, .. } | Outcome::Ancestor { node, .. } => Some(*node),
            _ => None,
        }
    }
}

/// Classify the outcome of `attr` in a finished run
pub fn classify(graph: &ExecutionGraph, stats: &RunStats, attr: &str) -> Outcome {
    let Some(source) = graph.source_of(attr) else {
        return if graph.is_unreachable(attr) {
            Outcome::Unreachable
        } else {
            Outcome::Resolved
        };
    };

    let responsible: Vec<NodeId> = match graph.node(source) {
        Some(Node::Or(or)) => or.branches.to_vec(),
        _ => vec![source],
    };

    if responsible
        .iter()
        .any(|&id| stats.node(id).is_some_and(|r| r.produced(attr)))
    {
        return Outcome::Resolved;
    }

    // Own failure first, in attempt order
    let mut failures: Vec<_> = responsible
        .iter()
        .filter_map(|&id| stats.node(id))
        .filter(|r| r.status == NodeStatus::Failed)
        .collect();
    failures.sort_by_key(|r| (r.start_ms, r.node));
    if let Some(run) = failures.into_iter().next() {
        if let Some(error) = run.error {
            return Outcome::Direct {
                node: run.node,
                error,
            };
        }
    }

    if let Some((node, error)) = find_ancestor_failure(graph, stats, &responsible) {
        return Outcome::Ancestor { node, error };
    }

    Outcome::Omitted { node: source }
}

/// BFS upstream from `start` for the closest failed node
fn find_ancestor_failure(
    graph: &ExecutionGraph,
    stats: &RunStats,
    start: &[NodeId],
) -> Option<(NodeId, GraphError)> {
    let mut visited: FxHashSet<NodeId> = start.iter().copied().collect();
    let mut queue: VecDeque<NodeId> = start.iter().copied().collect();

    while let Some(current) = queue.pop_front() {
        let branches = graph.node(current).map(Node::branches).unwrap_or_default();
        for &up in graph.predecessors(current).iter().chain(branches) {
            if !visited.insert(up) {
                continue;
            }
            if let Some(run) = stats.node(up) {
                if let (NodeStatus::Failed, Some(error)) = (run.status, run.error) {
                    return Some((up, error));
                }
            }
            queue.push_back(up);
        }
    }
    None
}
