//! Planner - backward chaining from requested attributes to resolver chains
//!
//! `plan` is a pure function: Index + Request + known-data Shape →
//! [`ExecutionGraph`]. Missing paths are data (unreachable sets), never errors.
//!
//! Construction rules:
//! - known attribute: no node
//! - zero viable alternatives: unreachable
//! - one viable resolver: its node, with missing inputs wired in front of it
//!   (a lone unattached input continues straight into it, several go through an AND)
//! - several viable resolvers: OR node over their resolver nodes
//! - several top-level sources: synthesized AND root
//!
//! Nested joins are checked with a recursive sub-plan against the resolver's
//! declared nested output. Inputs declared with a nested shape are checked
//! the same way against their producers. Recursion is capped by depth and by
//! a stack of (query, shape) fingerprints.
//!
//! An alternative set cut short by a dependency cycle on an outer attribute
//! depends on where planning entered the cycle, so it is never memoized.
//! Request entries are planned highest-priority producer first, which cuts a
//! cycle between requested attributes on its lower-priority side.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument};

use crate::ast::{Attr, Request, Resolver, ResolverId, Shape};
use crate::index::Index;
use crate::util::Fingerprinter;

use super::graph::{has_path_with, AndNode, ExecutionGraph, Node, NodeId, NodeVec, OrNode, ResolverNode};

/// Default cap on nested join recursion
pub const DEFAULT_MAX_NESTED_DEPTH: usize = 8;

/// Planner knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub max_nested_depth: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            max_nested_depth: DEFAULT_MAX_NESTED_DEPTH,
        }
    }
}

/// Plan `request` against `index`, treating attributes in `known` as present
pub fn plan(index: &Index, request: &Request, known: &Shape) -> ExecutionGraph {
    plan_with(index, request, known, &PlanOptions::default())
}

/// [`plan`] with explicit options
#[instrument(name = "plan", skip_all, fields(attrs = request.attrs().count()))]
pub fn plan_with(
    index: &Index,
    request: &Request,
    known: &Shape,
    options: &PlanOptions,
) -> ExecutionGraph {
    let graph = plan_nested(index, request, known, options, &mut Vec::new());
    debug!(
        nodes = graph.node_count(),
        unreachable = graph.unreachable_attrs().len(),
        "planned"
    );
    graph
}

fn plan_nested(
    index: &Index,
    request: &Request,
    known: &Shape,
    options: &PlanOptions,
    joins: &mut Vec<u64>,
) -> ExecutionGraph {
    Planner {
        index,
        request,
        known,
        options,
        joins,
        nodes: BTreeMap::new(),
        next_id: 0,
        attr_index: BTreeMap::new(),
        resolver_nodes: FxHashMap::default(),
        parents: FxHashMap::default(),
        dead: FxHashSet::default(),
        unreachable_attrs: BTreeSet::new(),
        unreachable_resolvers: BTreeSet::new(),
        in_progress: Vec::new(),
    }
    .run()
}

/// Where an attribute comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Known,
    Node(NodeId),
    Unreachable,
}

/// An attribute being planned
struct Frame {
    attr: Attr,
    /// Shallowest in-progress frame a cycle cut reached from here
    low: usize,
}

struct Planner<'a> {
    index: &'a Index,
    request: &'a Request,
    known: &'a Shape,
    options: &'a PlanOptions,
    /// Fingerprints of the nested joins being checked (outermost first)
    joins: &'a mut Vec<u64>,
    nodes: BTreeMap<NodeId, Node>,
    next_id: NodeId,
    attr_index: BTreeMap<Attr, NodeId>,
    resolver_nodes: FxHashMap<ResolverId, NodeId>,
    /// node → AND/OR nodes listing it as a branch
    parents: FxHashMap<NodeId, NodeVec>,
    /// Attributes proven unreachable (memoized)
    dead: FxHashSet<Attr>,
    unreachable_attrs: BTreeSet<Attr>,
    unreachable_resolvers: BTreeSet<ResolverId>,
    /// Attributes currently being planned, outermost first
    in_progress: Vec<Frame>,
}

impl Planner<'_> {
    fn run(mut self) -> ExecutionGraph {
        let request = self.request;
        let index = self.index;
        let mut entries: Vec<(usize, &Attr)> = request.attrs().map(|e| &e.attr).enumerate().collect();
        entries.sort_by_key(|(_, attr)| {
            Reverse(index.candidates(attr.as_str()).first().map_or(i64::MIN, |r| r.priority))
        });

        let mut sourced = Vec::with_capacity(entries.len());
        for (position, attr) in entries {
            if let Source::Node(id) = self.source(attr) {
                sourced.push((position, id));
            }
        }
        sourced.sort_by_key(|(position, _)| *position);
        let mut roots = NodeVec::new();
        for (_, id) in sourced {
            push_unique(&mut roots, id);
        }

        let roots = self.prune_ancestors(roots);
        let root = match roots.as_slice() {
            [] => None,
            [single] if self.nodes[single].next().is_none() => Some(*single),
            _ => Some(self.alloc_and(roots, None)),
        };

        self.finish(root)
    }

    // ═══════════════════════════════════════════════════════════════
    // Attribute sources
    // ═══════════════════════════════════════════════════════════════

    fn source(&mut self, attr: &Attr) -> Source {
        if self.known.contains(attr.as_str()) {
            return Source::Known;
        }
        if let Some(&id) = self.attr_index.get(attr) {
            return Source::Node(id);
        }
        if self.dead.contains(attr) {
            return Source::Unreachable;
        }
        if let Some(depth) = self.in_progress.iter().position(|f| f.attr == *attr) {
            debug!(attr = %attr, "dependency cycle cut");
            if let Some(frame) = self.in_progress.last_mut() {
                frame.low = frame.low.min(depth);
            }
            return Source::Unreachable;
        }

        let depth = self.in_progress.len();
        self.in_progress.push(Frame {
            attr: attr.clone(),
            low: depth,
        });
        let mut viable = NodeVec::new();

        for resolver in self.index.candidates(attr.as_str()) {
            if !self.nested_viable(&resolver, attr) {
                debug!(attr = %attr, resolver = %resolver.id, "nested requirements unsatisfiable");
                self.unreachable_resolvers.insert(resolver.id.clone());
                continue;
            }
            match self.resolver_node(&resolver, attr) {
                Some(id) => push_unique(&mut viable, id),
                None => {
                    self.unreachable_resolvers.insert(resolver.id.clone());
                }
            }
        }

        let low = self.in_progress.pop().map_or(depth, |f| f.low);
        // Cut above this frame: the alternatives only hold for this entry point
        let settled = low >= depth;
        if !settled {
            debug!(attr = %attr, "alternatives cut by an outer cycle, not memoized");
            if let Some(parent) = self.in_progress.last_mut() {
                parent.low = parent.low.min(low);
            }
        }

        match viable.len() {
            0 => {
                if settled {
                    self.dead.insert(attr.clone());
                }
                self.unreachable_attrs.insert(attr.clone());
                Source::Unreachable
            }
            1 => {
                if settled {
                    self.attr_index.insert(attr.clone(), viable[0]);
                }
                Source::Node(viable[0])
            }
            _ => {
                let id = self.alloc(Node::Or(OrNode {
                    attr: attr.clone(),
                    branches: viable.clone(),
                }));
                for branch in viable {
                    self.parents.entry(branch).or_default().push(id);
                }
                if settled {
                    self.attr_index.insert(attr.clone(), id);
                }
                Source::Node(id)
            }
        }
    }

    /// Node calling `resolver`, built with its inputs on first use
    fn resolver_node(&mut self, resolver: &Arc<Resolver>, attr: &Attr) -> Option<NodeId> {
        let request = self.request;
        let params = request.get(attr.as_str()).and_then(|e| e.params.clone());

        if let Some(&id) = self.resolver_nodes.get(&resolver.id) {
            if let Some(Node::Resolver(node)) = self.nodes.get_mut(&id) {
                node.produces.insert(attr.clone(), Shape::new());
                if node.params.is_none() {
                    node.params = params;
                }
            }
            return Some(id);
        }

        let mut deps = NodeVec::new();
        for (input, nested) in resolver.input.iter() {
            let source = self.source(input);
            if source != Source::Unreachable
                && !nested.is_empty()
                && !self.nested_input_viable(input, nested)
            {
                debug!(resolver = %resolver.id, input = %input, "nested input unsatisfiable");
                return None;
            }
            match source {
                Source::Known => {}
                Source::Node(id) => push_unique(&mut deps, id),
                Source::Unreachable => {
                    debug!(resolver = %resolver.id, input = %input, "required input unreachable");
                    return None;
                }
            }
        }
        for input in resolver.optional_input.attrs() {
            if let Source::Node(id) = self.source(input) {
                push_unique(&mut deps, id);
            }
        }

        // Planning the inputs may have reached this resolver through another output
        if let Some(&id) = self.resolver_nodes.get(&resolver.id) {
            if let Some(Node::Resolver(node)) = self.nodes.get_mut(&id) {
                node.produces.insert(attr.clone(), Shape::new());
            }
            return Some(id);
        }

        let id = self.alloc(Node::Resolver(ResolverNode {
            resolver: resolver.id.clone(),
            requires: resolver.input.clone(),
            optional: resolver.optional_input.clone(),
            produces: Shape::leaf([attr.clone()]),
            params,
            next: None,
        }));
        self.resolver_nodes.insert(resolver.id.clone(), id);
        self.wire(deps, id);
        Some(id)
    }

    /// Connect input sources in front of `target`
    fn wire(&mut self, deps: NodeVec, target: NodeId) {
        let deps = self.prune_ancestors(deps);
        match deps.as_slice() {
            [] => {}
            [single] if self.can_continue(*single) => {
                self.set_next(*single, target);
            }
            _ => {
                self.alloc_and(deps, Some(target));
            }
        }
    }

    /// Resolver nodes without continuation or parent take one directly
    fn can_continue(&self, id: NodeId) -> bool {
        !self.parents.contains_key(&id)
            && match &self.nodes[&id] {
                Node::Resolver(r) => r.next.is_none(),
                Node::And(_) | Node::Or(_) => false,
            }
    }

    /// Drop nodes that are guaranteed to run before one of their siblings
    fn prune_ancestors(&self, deps: NodeVec) -> NodeVec {
        deps.iter()
            .copied()
            .filter(|&d| {
                !deps
                    .iter()
                    .any(|&other| other != d && self.runs_before(d, other))
            })
            .collect()
    }

    /// `from` always executes when `to` does (continuation and AND edges only)
    fn runs_before(&self, from: NodeId, to: NodeId) -> bool {
        has_path_with(from, to, |id| {
            let mut out = NodeVec::new();
            if let Some(next) = self.nodes.get(&id).and_then(Node::next) {
                out.push(next);
            }
            for parent in self.parents.get(&id).into_iter().flatten() {
                if matches!(self.nodes.get(parent), Some(Node::And(_))) {
                    out.push(*parent);
                }
            }
            out
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Nested joins
    // ═══════════════════════════════════════════════════════════════

    /// Whether `resolver`'s declared nested output can feed the join on `attr`
    fn nested_viable(&mut self, resolver: &Resolver, attr: &Attr) -> bool {
        let request = self.request;
        let Some(query) = request.get(attr.as_str()).and_then(|e| e.query.as_ref()) else {
            return true;
        };
        match resolver.output.get(attr.as_str()) {
            Some(declared) => self.join_viable(attr, query, declared),
            None => true,
        }
    }

    /// Whether some source of `attr` can be completed to the `required` input shape
    fn nested_input_viable(&mut self, attr: &Attr, required: &Shape) -> bool {
        let query = Request::from_shape(required);
        let known = self.known;
        if let Some(present) = known.get(attr.as_str()) {
            return self.join_viable(attr, &query, present);
        }
        let index = self.index;
        index.candidates(attr.as_str()).iter().any(|producer| {
            match producer.output.get(attr.as_str()) {
                Some(declared) => self.join_viable(attr, &query, declared),
                None => true,
            }
        })
    }

    /// Whether entities shaped like `declared` can satisfy `query` once planned
    fn join_viable(&mut self, attr: &Attr, query: &Request, declared: &Shape) -> bool {
        // Nothing declared: only the run can tell
        if declared.is_empty() {
            return true;
        }

        if self.joins.len() >= self.options.max_nested_depth {
            debug!(attr = %attr, depth = self.joins.len(), "nested depth cap reached");
            return false;
        }
        let mut fp = Fingerprinter::new();
        query.fingerprint_into(&mut fp);
        declared.fingerprint_into(&mut fp);
        let key = fp.finish();
        if self.joins.contains(&key) {
            debug!(attr = %attr, "recursive nested join");
            return false;
        }

        self.joins.push(key);
        let sub = plan_nested(self.index, query, declared, self.options, self.joins);
        self.joins.pop();

        query
            .required_shape()
            .attrs()
            .all(|a| declared.contains(a.as_str()) || sub.source_of(a.as_str()).is_some())
    }

    // ═══════════════════════════════════════════════════════════════
    // Node allocation
    // ═══════════════════════════════════════════════════════════════

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn alloc_and(&mut self, branches: NodeVec, next: Option<NodeId>) -> NodeId {
        let id = self.alloc(Node::And(AndNode {
            branches: branches.clone(),
            next,
        }));
        for branch in branches {
            self.parents.entry(branch).or_default().push(id);
        }
        id
    }

    fn set_next(&mut self, id: NodeId, next: NodeId) {
        match self.nodes.get_mut(&id) {
            Some(Node::Resolver(r)) => r.next = Some(next),
            Some(Node::And(a)) => a.next = Some(next),
            Some(Node::Or(_)) | None => {}
        }
    }

    /// Drop nodes that never reach the root and settle the diagnostics
    fn finish(mut self, root: Option<NodeId>) -> ExecutionGraph {
        let mut keep: FxHashSet<NodeId> = FxHashSet::default();
        if let Some(root) = root {
            let mut predecessors: FxHashMap<NodeId, NodeVec> = FxHashMap::default();
            for (&id, node) in &self.nodes {
                if let Some(next) = node.next() {
                    predecessors.entry(next).or_default().push(id);
                }
            }
            let mut queue: VecDeque<NodeId> = VecDeque::from([root]);
            keep.insert(root);
            while let Some(id) = queue.pop_front() {
                let upstream: NodeVec = predecessors
                    .get(&id)
                    .into_iter()
                    .flatten()
                    .chain(self.nodes[&id].branches())
                    .copied()
                    .collect();
                for up in upstream {
                    if keep.insert(up) {
                        queue.push_back(up);
                    }
                }
            }
        }

        let dropped = self.nodes.len() - keep.len();
        if dropped > 0 {
            debug!(dropped, "pruned detached nodes");
        }
        self.nodes.retain(|id, _| keep.contains(id));
        for node in self.nodes.values_mut() {
            let next = match node {
                Node::Resolver(r) => &mut r.next,
                Node::And(a) => &mut a.next,
                Node::Or(_) => continue,
            };
            if next.is_some_and(|n| !keep.contains(&n)) {
                *next = None;
            }
        }
        self.attr_index.retain(|_, id| keep.contains(id));

        let planned: FxHashSet<&ResolverId> = self
            .nodes
            .values()
            .filter_map(Node::as_resolver)
            .map(|r| &r.resolver)
            .collect();
        self.unreachable_resolvers.retain(|r| !planned.contains(r));
        let attr_index = &self.attr_index;
        let known = self.known;
        self.unreachable_attrs
            .retain(|a| !attr_index.contains_key(a) && !known.contains(a.as_str()));

        ExecutionGraph::new(
            self.nodes,
            root,
            self.attr_index,
            self.unreachable_attrs,
            self.unreachable_resolvers,
        )
    }
}

fn push_unique(list: &mut NodeVec, id: NodeId) {
    if !list.contains(&id) {
        list.push(id);
    }
}
