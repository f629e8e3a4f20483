//! Choose-Path - ordering of OR branches
//!
//! The runner attempts OR branches strictly in the order returned by the
//! configured [`PathChooser`], stopping at the first branch that produces the
//! attribute.

use std::cmp::Reverse;

use crate::index::Index;
use crate::plan::{ExecutionGraph, Node, NodeId, OrNode};

/// Strategy deciding the attempt order of an OR node's branches
pub trait PathChooser: Send + Sync {
    fn order(&self, graph: &ExecutionGraph, index: &Index, or: &OrNode) -> Vec<NodeId>;
}

/// Default: highest leaf priority first, then resolver id, then node id
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityChooser;

impl PathChooser for PriorityChooser {
    fn order(&self, graph: &ExecutionGraph, index: &Index, or: &OrNode) -> Vec<NodeId> {
        let mut ranked: Vec<(Reverse<i64>, String, NodeId)> = or
            .branches
            .iter()
            .map(|&branch| {
                let (priority, id) = leaves(graph, branch)
                    .into_iter()
                    .filter_map(|leaf| graph.node(leaf).and_then(Node::as_resolver))
                    .map(|r| {
                        let priority = index.resolver(r.resolver.as_str()).map_or(0, |res| res.priority);
                        (priority, r.resolver.to_string())
                    })
                    .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
                    .unwrap_or((0, String::new()));
                (Reverse(priority), id, branch)
            })
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, _, branch)| branch).collect()
    }
}

/// Registry order: branches as planned
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannedOrder;

impl PathChooser for PlannedOrder {
    fn order(&self, _graph: &ExecutionGraph, _index: &Index, or: &OrNode) -> Vec<NodeId> {
        or.branches.to_vec()
    }
}

/// Flatten a branch to its leaf resolver nodes
fn leaves(graph: &ExecutionGraph, start: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![start];
    let mut seen = rustc_hash::FxHashSet::default();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match graph.node(id) {
            Some(Node::Resolver(_)) => out.push(id),
            Some(node) => stack.extend(node.branches().iter().rev().copied()),
            None => {}
        }
    }
    out
}
