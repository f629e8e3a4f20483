//! RunStats - per-node run records for one run
//!
//! Side channel next to the result tree:
//! - NodeRun: timestamps, input snapshot, output or captured error, status
//! - nested sub-run stats keyed by path (`friends[1]`)
//! - mutation records
//! - warnings (downgraded batches)
//!
//! Timestamps are milliseconds relative to the run start.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::ast::ResolverId;
use crate::error::GraphError;
use crate::plan::NodeId;

/// How a resolver node ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Invoked and written back
    Success,
    /// Invocation or post-processing produced an error
    Failed,
    /// Not invoked: a required input was absent
    Skipped,
}

fn serialize_error<S: Serializer>(
    error: &Option<GraphError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => json!({ "code": e.code(), "message": e.to_string() }).serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// Record of one resolver node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRun {
    pub node: NodeId,
    pub resolver: ResolverId,
    pub status: NodeStatus,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<GraphError>,
    /// Items in the batch call that served this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl NodeRun {
    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }

    /// Whether the written-back output carries `attr`
    pub fn produced(&self, attr: &str) -> bool {
        self.output
            .as_ref()
            .and_then(|o| o.get(attr))
            .is_some_and(|v| !crate::ast::is_unknown(v))
    }
}

/// Record of one mutation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationRun {
    pub mutation: ResolverId,
    pub start_ms: u64,
    pub end_ms: u64,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<GraphError>,
}

struct StatsInner {
    start_time: Instant,
    nodes: RwLock<BTreeMap<NodeId, NodeRun>>,
    nested: RwLock<BTreeMap<String, RunStats>>,
    mutations: RwLock<Vec<MutationRun>>,
    warnings: RwLock<Vec<GraphError>>,
}

/// Thread-safe run statistics (cheap to clone)
#[derive(Clone)]
pub struct RunStats {
    inner: Arc<StatsInner>,
}

impl RunStats {
    /// Create stats for a run starting now
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                start_time: Instant::now(),
                nodes: RwLock::new(BTreeMap::new()),
                nested: RwLock::new(BTreeMap::new()),
                mutations: RwLock::new(Vec::new()),
                warnings: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Milliseconds since the run started
    pub fn elapsed_ms(&self) -> u64 {
        self.inner.start_time.elapsed().as_millis() as u64
    }

    pub fn record(&self, run: NodeRun) {
        self.inner.nodes.write().insert(run.node, run);
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRun> {
        self.inner.nodes.read().get(&id).cloned()
    }

    /// All node records, by node id
    pub fn nodes(&self) -> Vec<NodeRun> {
        self.inner.nodes.read().values().cloned().collect()
    }

    pub fn add_nested(&self, path: impl Into<String>, stats: RunStats) {
        self.inner.nested.write().insert(path.into(), stats);
    }

    pub fn nested(&self, path: &str) -> Option<RunStats> {
        self.inner.nested.read().get(path).cloned()
    }

    pub fn nested_paths(&self) -> Vec<String> {
        self.inner.nested.read().keys().cloned().collect()
    }

    pub fn record_mutation(&self, run: MutationRun) {
        self.inner.mutations.write().push(run);
    }

    pub fn mutations(&self) -> Vec<MutationRun> {
        self.inner.mutations.read().clone()
    }

    pub fn warn(&self, warning: GraphError) {
        self.inner.warnings.write().push(warning);
    }

    pub fn warnings(&self) -> Vec<GraphError> {
        self.inner.warnings.read().clone()
    }

    /// Errors recorded at this level (node order, then mutations)
    pub fn errors(&self) -> Vec<GraphError> {
        let nodes = self.inner.nodes.read();
        let mutations = self.inner.mutations.read();
        nodes
            .values()
            .filter_map(|r| r.error.clone())
            .chain(mutations.iter().filter_map(|m| m.error.clone()))
            .collect()
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.inner
            .nodes
            .read()
            .values()
            .filter(|r| r.is_failed())
            .map(|r| r.node)
            .collect()
    }

    /// Number of node records at this level
    pub fn len(&self) -> usize {
        self.inner.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to JSON for inspection tooling
    pub fn to_json(&self) -> Value {
        let nodes: serde_json::Map<String, Value> = self
            .inner
            .nodes
            .read()
            .iter()
            .map(|(id, run)| {
                (
                    id.to_string(),
                    serde_json::to_value(run).unwrap_or(Value::Null),
                )
            })
            .collect();
        let nested: serde_json::Map<String, Value> = self
            .inner
            .nested
            .read()
            .iter()
            .map(|(path, stats)| (path.clone(), stats.to_json()))
            .collect();
        let warnings: Vec<Value> = self
            .inner
            .warnings
            .read()
            .iter()
            .map(|w| json!({ "code": w.code(), "message": w.to_string() }))
            .collect();
        let mutations =
            serde_json::to_value(&*self.inner.mutations.read()).unwrap_or(Value::Null);
        json!({
            "nodes": nodes,
            "nested": nested,
            "mutations": mutations,
            "warnings": warnings,
        })
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStats")
            .field("nodes", &self.len())
            .field("nested", &self.inner.nested.read().len())
            .finish()
    }
}
