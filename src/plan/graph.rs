//! ExecutionGraph - DAG of resolver, conjunction and disjunction nodes
//!
//! Edges point toward the root:
//! - continuation: `node.next`, run after the node completes
//! - branch-of: a node listed in an AND/OR node's `branches`
//!
//! The graph is immutable once planned. Predecessor and parent indexes are
//! derived on construction so the runner and the diagnostics can walk
//! backward without scanning every node.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;

use crate::ast::{Attr, ResolverId, Shape};
use crate::error::{GraphError, Result};

/// Node identifier, assigned monotonically per planning pass
pub type NodeId = u32;

/// Stack-allocated node lists: most nodes have 0-4 neighbours
pub type NodeVec = SmallVec<[NodeId; 4]>;

/// Call of one resolver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverNode {
    pub resolver: ResolverId,
    pub requires: Shape,
    pub optional: Shape,
    /// Attributes this node is the source for
    pub produces: Shape,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NodeId>,
}

/// Conjunction: every branch completes before `next` runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AndNode {
    pub branches: NodeVec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NodeId>,
}

/// Disjunction: substitutable branches for one attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrNode {
    pub attr: Attr,
    pub branches: NodeVec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Resolver(ResolverNode),
    And(AndNode),
    Or(OrNode),
}

impl Node {
    /// Continuation link (OR nodes have none)
    pub fn next(&self) -> Option<NodeId> {
        match self {
            Node::Resolver(r) => r.next,
            Node::And(a) => a.next,
            Node::Or(_) => None,
        }
    }

    pub fn branches(&self) -> &[NodeId] {
        match self {
            Node::Resolver(_) => &[],
            Node::And(a) => &a.branches,
            Node::Or(o) => &o.branches,
        }
    }

    pub fn as_resolver(&self) -> Option<&ResolverNode> {
        match self {
            Node::Resolver(r) => Some(r),
            _ => None,
        }
    }
}

/// Planner output
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    nodes: BTreeMap<NodeId, Node>,
    root: Option<NodeId>,
    attr_index: BTreeMap<Attr, NodeId>,
    resolver_index: BTreeMap<ResolverId, NodeVec>,
    unreachable_attrs: BTreeSet<Attr>,
    unreachable_resolvers: BTreeSet<ResolverId>,
    /// node → nodes whose `next` is this node
    predecessors: FxHashMap<NodeId, NodeVec>,
    /// node → AND/OR nodes listing it as a branch
    parents: FxHashMap<NodeId, NodeVec>,
}

impl ExecutionGraph {
    pub(crate) fn new(
        nodes: BTreeMap<NodeId, Node>,
        root: Option<NodeId>,
        attr_index: BTreeMap<Attr, NodeId>,
        unreachable_attrs: BTreeSet<Attr>,
        unreachable_resolvers: BTreeSet<ResolverId>,
    ) -> Self {
        let mut predecessors: FxHashMap<NodeId, NodeVec> = FxHashMap::default();
        let mut parents: FxHashMap<NodeId, NodeVec> = FxHashMap::default();
        let mut resolver_index: BTreeMap<ResolverId, NodeVec> = BTreeMap::new();

        for (&id, node) in &nodes {
            if let Some(next) = node.next() {
                predecessors.entry(next).or_default().push(id);
            }
            for &branch in node.branches() {
                parents.entry(branch).or_default().push(id);
            }
            if let Node::Resolver(r) = node {
                resolver_index.entry(r.resolver.clone()).or_default().push(id);
            }
        }

        Self {
            nodes,
            root,
            attr_index,
            resolver_index,
            unreachable_attrs,
            unreachable_resolvers,
            predecessors,
            parents,
        }
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(&id, node)| (id, node))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node responsible for an attribute
    pub fn source_of(&self, attr: &str) -> Option<NodeId> {
        self.attr_index.get(attr).copied()
    }

    pub fn attr_index(&self) -> &BTreeMap<Attr, NodeId> {
        &self.attr_index
    }

    /// Resolver nodes calling `resolver`
    pub fn nodes_for(&self, resolver: &str) -> &[NodeId] {
        static EMPTY: &[NodeId] = &[];
        self.resolver_index
            .get(resolver)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    pub fn unreachable_attrs(&self) -> &BTreeSet<Attr> {
        &self.unreachable_attrs
    }

    pub fn unreachable_resolvers(&self) -> &BTreeSet<ResolverId> {
        &self.unreachable_resolvers
    }

    pub fn is_unreachable(&self, attr: &str) -> bool {
        self.unreachable_attrs.contains(attr)
    }

    /// Nodes continuing into `id`
    #[inline]
    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        static EMPTY: &[NodeId] = &[];
        self.predecessors
            .get(&id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// AND/OR nodes listing `id` as a branch
    #[inline]
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        static EMPTY: &[NodeId] = &[];
        self.parents.get(&id).map_or(EMPTY, SmallVec::as_slice)
    }

    /// Check if `to` is reachable from `from` following edges toward the root (BFS)
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        has_path_with(from, to, |id| {
            self.node(id)
                .and_then(Node::next)
                .into_iter()
                .chain(self.parents(id).iter().copied())
                .collect()
        })
    }

    /// Check structural invariants: acyclic, every node reaches the root
    pub fn validate(&self) -> Result<()> {
        self.detect_cycles()?;
        let Some(root) = self.root else {
            return match self.nodes.keys().next() {
                Some(&node) => Err(GraphError::DanglingNode { node }),
                None => Ok(()),
            };
        };

        // Reverse BFS from the root over predecessor and branch edges
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        let mut queue: VecDeque<NodeId> = VecDeque::from([root]);
        seen.insert(root);
        while let Some(id) = queue.pop_front() {
            let branches = self.node(id).map(Node::branches).unwrap_or_default();
            for &up in self.predecessors(id).iter().chain(branches) {
                if seen.insert(up) {
                    queue.push_back(up);
                }
            }
        }

        match self.nodes.keys().find(|id| !seen.contains(id)) {
            Some(&node) => Err(GraphError::DanglingNode { node }),
            None => Ok(()),
        }
    }

    /// Detect cycles using DFS with three-color marking
    ///
    /// - White: unvisited
    /// - Gray: currently in DFS stack
    /// - Black: fully processed
    ///
    /// A cycle is detected when we reach a Gray node.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            graph: &ExecutionGraph,
            node: NodeId,
            colors: &mut FxHashMap<NodeId, Color>,
            stack: &mut Vec<NodeId>,
        ) -> std::result::Result<(), String> {
            colors.insert(node, Color::Gray);
            stack.push(node);

            let outgoing = graph
                .node(node)
                .and_then(Node::next)
                .into_iter()
                .chain(graph.parents(node).iter().copied());
            for neighbor in outgoing {
                match colors.get(&neighbor) {
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|&x| x == neighbor).unwrap_or(0);
                        let cycle: Vec<String> =
                            stack[start..].iter().map(|id| id.to_string()).collect();
                        return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                    }
                    Some(Color::White) | None => dfs(graph, neighbor, colors, stack)?,
                    Some(Color::Black) => {}
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<NodeId, Color> =
            self.nodes.keys().map(|&id| (id, Color::White)).collect();
        let mut stack: Vec<NodeId> = Vec::new();

        for &id in self.nodes.keys() {
            if colors.get(&id) == Some(&Color::White) {
                dfs(self, id, &mut colors, &mut stack)
                    .map_err(|cycle| GraphError::CycleDetected { cycle })?;
            }
        }
        Ok(())
    }

    /// JSON view for inspection tooling
    pub fn to_json(&self) -> Value {
        let nodes: serde_json::Map<String, Value> = self
            .nodes
            .iter()
            .map(|(id, node)| {
                (
                    id.to_string(),
                    serde_json::to_value(node).unwrap_or(Value::Null),
                )
            })
            .collect();
        json!({
            "root": self.root,
            "nodes": nodes,
            "index": self.attr_index,
            "unreachable": {
                "attributes": self.unreachable_attrs,
                "resolvers": self.unreachable_resolvers,
            },
        })
    }
}

/// BFS over an adjacency function
pub(crate) fn has_path_with<F>(from: NodeId, to: NodeId, mut neighbors: F) -> bool
where
    F: FnMut(NodeId) -> NodeVec,
{
    if from == to {
        return true;
    }
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(from);
    visited.insert(from);

    while let Some(current) = queue.pop_front() {
        for neighbor in neighbors(current) {
            if neighbor == to {
                return true;
            }
            if visited.insert(neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn resolver(id: &str, produces: &str, next: Option<NodeId>) -> Node {
        Node::Resolver(ResolverNode {
            resolver: ResolverId::new(id),
            requires: Shape::new(),
            optional: Shape::new(),
            produces: Shape::leaf([produces]),
            params: None,
            next,
        })
    }

    fn graph(nodes: Vec<(NodeId, Node)>, root: NodeId) -> ExecutionGraph {
        ExecutionGraph::new(
            nodes.into_iter().collect(),
            Some(root),
            BTreeMap::new(),
            BTreeSet::new(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn derived_indexes() {
        // 0 → 1, 2 is an AND over [1, 3]
        let g = graph(
            vec![
                (0, resolver("pi", "pi", Some(1))),
                (1, resolver("tau", "tau", None)),
                (3, resolver("e", "e", None)),
                (
                    2,
                    Node::And(AndNode {
                        branches: smallvec![1, 3],
                        next: None,
                    }),
                ),
            ],
            2,
        );
        assert_eq!(g.predecessors(1), &[0]);
        assert_eq!(g.parents(3), &[2]);
        assert_eq!(g.nodes_for("tau"), &[1]);
        assert!(g.has_path(0, 2));
        assert!(!g.has_path(2, 0));
        assert!(g.validate().is_ok());
    }

    #[test]
    fn continuation_cycle_is_detected() {
        let g = graph(
            vec![
                (0, resolver("a", "a", Some(1))),
                (1, resolver("b", "b", Some(0))),
            ],
            1,
        );
        let err = g.validate().unwrap_err();
        assert_eq!(err.code(), "AG-060");
        assert!(err.to_string().contains("→"));
    }

    #[test]
    fn dangling_node_is_reported() {
        let g = graph(
            vec![(0, resolver("a", "a", None)), (1, resolver("b", "b", None))],
            1,
        );
        assert_eq!(g.validate().unwrap_err(), GraphError::DanglingNode { node: 0 });
    }

    #[test]
    fn empty_graph_is_valid() {
        assert!(ExecutionGraph::default().validate().is_ok());
    }

    #[test]
    fn json_view_tags_node_kinds() {
        let g = graph(vec![(0, resolver("pi", "pi", None))], 0);
        let json = g.to_json();
        assert_eq!(json["root"], json!(0));
        assert_eq!(json["nodes"]["0"]["type"], json!("resolver"));
        assert_eq!(json["nodes"]["0"]["resolver"], json!("pi"));
        assert_eq!(json["nodes"]["0"]["produces"], json!(["pi"]));
    }
}
