//! Graph Runner - executes an execution graph against live entity data
//!
//! Execution is pull-based from the root: every node first pulls the nodes
//! that continue into it, then runs its own body. Each node runs at most
//! once per run (one `OnceCell` per node), so shared subgraphs are never
//! re-executed.
//!
//! - AND: branches pulled concurrently with `join_all`
//! - OR: branches attempted one at a time in chooser order
//! - Resolver: projected input (nested input shapes joined first) →
//!   extension stack → resolver → nested joins → write-back → run record
//!
//! Join attributes are re-planned (through the plan cache) and re-run per
//! nested entity. Collection elements run as separate tasks on a `JoinSet`,
//! coordinated through a batch barrier, and are reassembled by index.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::ast::{
    is_unknown, Attr, Entity, Request, ResolveContext, Resolver, Shape, SET_KEY,
};
use crate::error::{GraphError, Result};
use crate::index::Index;
use crate::plan::{
    plan_with, ExecutionGraph, Node, NodeId, OrNode, PlanCache, PlanOptions, ResolverNode,
    DEFAULT_MAX_NESTED_DEPTH,
};
use crate::stats::{classify, MutationRun, NodeRun, NodeStatus, Outcome, RunStats};

use super::batch::{BatchBarrier, BatchHandle};
use super::choose::{PathChooser, PriorityChooser};
use super::entity::EntityStore;
use super::extension::{Extension, Extensions};

/// Node id carried by mutation contexts (mutations are not graph nodes)
pub const MUTATION_NODE: NodeId = NodeId::MAX;

// ═══════════════════════════════════════════════════════════════
// Configuration & output
// ═══════════════════════════════════════════════════════════════

/// Per-run configuration
#[derive(Clone)]
pub struct RunConfig {
    pub chooser: Arc<dyn PathChooser>,
    pub extensions: Extensions,
    pub max_nested_depth: usize,
    /// Coordinate batch resolvers across ordered collections
    pub batching: bool,
    /// Shared across runs when set
    pub plan_cache: Option<Arc<PlanCache>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chooser: Arc::new(PriorityChooser),
            extensions: Extensions::new(),
            max_nested_depth: DEFAULT_MAX_NESTED_DEPTH,
            batching: true,
            plan_cache: Some(Arc::new(PlanCache::new())),
        }
    }
}

impl RunConfig {
    pub fn with_chooser(mut self, chooser: Arc<dyn PathChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_max_nested_depth(mut self, depth: usize) -> Self {
        self.max_nested_depth = depth;
        self
    }

    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_plan_cache(mut self, cache: Option<Arc<PlanCache>>) -> Self {
        self.plan_cache = cache;
        self
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            max_nested_depth: self.max_nested_depth,
        }
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("extensions", &self.extensions)
            .field("max_nested_depth", &self.max_nested_depth)
            .field("batching", &self.batching)
            .field("plan_cache", &self.plan_cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Requested attributes only, shaped like the request
    pub result: Entity,
    /// Every attribute present in the entity tree at the end of the run
    pub entity: Entity,
    pub stats: RunStats,
    pub graph: Arc<ExecutionGraph>,
}

impl RunOutput {
    /// Diagnose a top-level attribute
    pub fn outcome(&self, attr: &str) -> Outcome {
        classify(&self.graph, &self.stats, attr)
    }

    pub fn errors(&self) -> Vec<GraphError> {
        self.stats.errors()
    }
}

// ═══════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════

/// Runs requests against one index
pub struct Runner {
    index: Index,
    config: Arc<RunConfig>,
}

impl Runner {
    pub fn new(index: Index) -> Self {
        Self::with_config(index, RunConfig::default())
    }

    pub fn with_config(index: Index, config: RunConfig) -> Self {
        Self {
            index,
            config: Arc::new(config),
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Plan and execute `request` against `data`
    #[instrument(name = "run", skip_all, fields(attrs = request.attrs().count()))]
    pub async fn run(&self, request: &Request, data: Entity) -> RunOutput {
        let ctx = RunContext {
            index: self.index.clone(),
            config: Arc::clone(&self.config),
        };
        let stats = RunStats::new();
        let scope = ctx.scope(request, data, String::new(), 0, None, stats.clone());
        let graph = Arc::clone(&scope.graph);

        let mut result = scope.run_mutations(request).await;
        Arc::clone(&scope).execute().await;
        result.extend(scope.shape(request));

        debug!(
            attrs = result.len(),
            failed = stats.failed_nodes().len(),
            "run finished"
        );
        RunOutput {
            result,
            entity: scope.store.snapshot(),
            stats,
            graph,
        }
    }
}

/// Plan and execute `request` once with `config`
pub async fn run(index: &Index, request: &Request, data: Entity, config: RunConfig) -> RunOutput {
    Runner::with_config(index.clone(), config)
        .run(request, data)
        .await
}

// ═══════════════════════════════════════════════════════════════
// Scopes
// ═══════════════════════════════════════════════════════════════

/// Shared, immutable part of a run
#[derive(Clone)]
struct RunContext {
    index: Index,
    config: Arc<RunConfig>,
}

impl RunContext {
    fn plan(&self, request: &Request, known: &Shape) -> Arc<ExecutionGraph> {
        let options = self.config.plan_options();
        match &self.config.plan_cache {
            Some(cache) => cache.get_or_plan(&self.index, request, known, &options),
            None => Arc::new(plan_with(&self.index, request, known, &options)),
        }
    }

    fn scope(
        &self,
        request: &Request,
        data: Entity,
        path: String,
        depth: usize,
        batch: Option<BatchMode>,
        stats: RunStats,
    ) -> Arc<Scope> {
        let graph = self.plan(request, &Shape::from_data(&data));
        let cells = graph.nodes().map(|(id, _)| (id, OnceCell::new())).collect();
        let joins = request
            .attrs()
            .filter_map(|entry| entry.query.clone().map(|q| (entry.attr.clone(), q)))
            .collect();
        Arc::new(Scope {
            ctx: self.clone(),
            graph,
            store: EntityStore::from_entity(data),
            stats,
            cells,
            joins,
            joined: Mutex::new(FxHashMap::default()),
            batch,
            path,
            depth,
        })
    }
}

/// How batch resolvers are invoked inside a scope
enum BatchMode {
    /// Element of an ordered collection: park on the shared barrier
    Barrier(BatchHandle),
    /// Element of an unordered set: single-item calls
    Single,
}

/// Result of processing one join value
enum Joined {
    Kept(Value),
    Dropped(GraphError),
}

/// One run or nested sub-run: graph, entity tree and stats
struct Scope {
    ctx: RunContext,
    graph: Arc<ExecutionGraph>,
    store: EntityStore,
    stats: RunStats,
    cells: FxHashMap<NodeId, OnceCell<()>>,
    /// Nested queries of this scope's request entries
    joins: FxHashMap<Attr, Request>,
    /// Processed join values (`None`: dropped)
    joined: Mutex<FxHashMap<Attr, Option<Value>>>,
    batch: Option<BatchMode>,
    path: String,
    depth: usize,
}

impl Scope {
    fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    /// Execute the whole graph, then joins on attributes supplied as data
    async fn execute(self: Arc<Self>) {
        let graph = Arc::clone(&self.graph);
        let stats = self.stats.clone();
        let config = Arc::clone(&self.ctx.config);
        let this = &self;
        let plan = &graph;
        config
            .extensions
            .around_graph(plan, &self.path, &stats, move || async move {
                if let Some(root) = plan.root() {
                    Arc::clone(this).ensure(root).await;
                }
                this.process_data_joins().await;
            })
            .await;
    }

    /// Run `id` once; concurrent callers wait for the first
    fn ensure(self: Arc<Self>, id: NodeId) -> BoxFuture<'static, ()> {
        async move {
            let Some(cell) = self.cells.get(&id) else {
                return;
            };
            cell.get_or_init(|| Arc::clone(&self).execute_node(id))
                .await;
        }
        .boxed()
    }

    async fn execute_node(self: Arc<Self>, id: NodeId) {
        let graph = Arc::clone(&self.graph);
        let predecessors = graph.predecessors(id);
        if !predecessors.is_empty() {
            join_all(predecessors.iter().map(|&p| Arc::clone(&self).ensure(p))).await;
        }

        match graph.node(id) {
            Some(Node::Resolver(node)) => self.run_resolver(id, node).await,
            Some(Node::And(and)) => {
                join_all(and.branches.iter().map(|&b| Arc::clone(&self).ensure(b))).await;
            }
            Some(Node::Or(or)) => self.run_or(or).await,
            None => {}
        }
    }

    async fn run_or(self: &Arc<Self>, or: &OrNode) {
        let order = self
            .config()
            .chooser
            .order(&self.graph, &self.ctx.index, or);
        for branch in order {
            Arc::clone(self).ensure(branch).await;
            if self.store.contains(or.attr.as_str()) {
                debug!(attr = %or.attr, branch, "OR satisfied");
                return;
            }
            debug!(attr = %or.attr, branch, "OR branch did not produce, trying next");
        }
        debug!(attr = %or.attr, "no OR branch produced");
    }

    // ───────────────────────────────────────────────────────────
    // Resolver nodes
    // ───────────────────────────────────────────────────────────

    async fn run_resolver(self: &Arc<Self>, id: NodeId, node: &ResolverNode) {
        let start_ms = self.stats.elapsed_ms();
        let ctx = ResolveContext {
            resolver: node.resolver.clone(),
            node: id,
            params: node.params.clone(),
            path: self.path.clone(),
        };
        let record = |status: NodeStatus,
                      input: Option<Value>,
                      output: Option<Value>,
                      error: Option<GraphError>,
                      batch_size: Option<usize>| {
            debug!(node = id, resolver = %node.resolver, ?status, "node finished");
            self.stats.record(NodeRun {
                node: id,
                resolver: node.resolver.clone(),
                status,
                start_ms,
                end_ms: self.stats.elapsed_ms(),
                input,
                output,
                error,
                batch_size,
            });
        };

        let Some(resolver) = self.ctx.index.resolver(node.resolver.as_str()).cloned() else {
            let error = self.attach(
                &ctx,
                GraphError::resolver(node.resolver.as_str(), "resolver is not registered"),
            );
            record(NodeStatus::Failed, None, None, Some(error), None);
            return;
        };

        if node.requires.attrs().any(|a| !self.store.contains(a.as_str())) {
            record(NodeStatus::Skipped, None, None, None, None);
            return;
        }

        let input = match self.project_input(node, &resolver.input_projection()).await {
            Ok(input) => input,
            Err(e) => {
                let error = self.attach(&ctx, e);
                record(NodeStatus::Failed, None, None, Some(error), None);
                return;
            }
        };
        let snapshot = Value::Object(input.clone());

        let (result, batch_size) = self.invoke(&resolver, &ctx, input).await;
        let output = match result.and_then(|out| declared_output(&resolver, out)) {
            Ok(output) => output,
            Err(e) => {
                let error = self.attach(&ctx, e);
                record(NodeStatus::Failed, Some(snapshot), None, Some(error), batch_size);
                return;
            }
        };

        let (output, nested_error) = self.process_output_joins(output).await;
        let written = Value::Object(self.write(output));

        match nested_error {
            Some(e) => {
                let error = self.attach(&ctx, e);
                record(
                    NodeStatus::Failed,
                    Some(snapshot),
                    Some(written),
                    Some(error),
                    batch_size,
                );
            }
            None => record(
                NodeStatus::Success,
                Some(snapshot),
                Some(written),
                None,
                batch_size,
            ),
        }
    }

    /// Project the input, joining inputs declared with a nested shape
    ///
    /// A required nested input left short fails the node. An optional one
    /// is left out of the input.
    async fn project_input(self: &Arc<Self>, node: &ResolverNode, projection: &Shape) -> Result<Entity> {
        let mut input = self.store.project(projection);
        let mut joined = Entity::new();
        for (attr, nested) in projection.iter() {
            if nested.is_empty() {
                continue;
            }
            let Some(value) = self.store.get(attr.as_str()).filter(|v| !is_unknown(v)) else {
                continue;
            };
            match self.join_input(attr, nested, value).await {
                Some(value) => {
                    joined.insert(attr.to_string(), value);
                }
                None if node.requires.contains(attr.as_str()) => {
                    return Err(GraphError::MissingInput {
                        resolver: node.resolver.to_string(),
                        attr: attr.to_string(),
                    });
                }
                None => {
                    debug!(resolver = %node.resolver, input = %attr, "optional nested input left out");
                    input.remove(attr.as_str());
                }
            }
        }
        input.extend(projection.project(&joined));
        Ok(input)
    }

    /// Join `value` against a nested input shape, all elements or nothing
    async fn join_input(self: &Arc<Self>, attr: &Attr, nested: &Shape, value: Value) -> Option<Value> {
        let expected = element_count(&value)?;
        match self.join_with(attr, Request::from_shape(nested), value).await {
            Joined::Kept(value) if element_count(&value) == Some(expected) => Some(value),
            Joined::Kept(_) => None,
            Joined::Dropped(e) => {
                debug!(attr = %attr, code = e.code(), "nested input unsatisfied");
                None
            }
        }
    }

    /// Call through the extension stack, batching when the scope allows it
    async fn invoke(
        &self,
        resolver: &Arc<Resolver>,
        ctx: &ResolveContext,
        input: Entity,
    ) -> (Result<Entity>, Option<usize>) {
        let mut batch_size = None;
        let size = &mut batch_size;
        let batched = resolver.batch && self.config().batching;
        let result = self
            .config()
            .extensions
            .around_resolver(ctx, input, move |input| async move {
                match (&self.batch, batched) {
                    (Some(BatchMode::Barrier(handle)), true) => {
                        let (result, n) = handle.call(Arc::clone(resolver), ctx, input).await;
                        *size = Some(n);
                        result
                    }
                    (Some(BatchMode::Single), true) => {
                        *size = Some(1);
                        resolver.invoker().resolve(ctx, input).await
                    }
                    _ => resolver.invoker().resolve(ctx, input).await,
                }
            })
            .await;
        (result, batch_size)
    }

    fn attach(&self, ctx: &ResolveContext, error: GraphError) -> GraphError {
        self.config().extensions.attach_error(ctx, error, |e| {
            debug!(resolver = %ctx.resolver, code = e.code(), "error captured")
        })
    }

    /// Merge through the write seam, returning the output as written
    fn write(&self, output: Entity) -> Entity {
        let (output, written) = self
            .config()
            .extensions
            .around_write(&self.path, output, |out| self.store.merge(out));
        debug!(path = %self.path, written = written.len(), "output merged");
        output
    }

    // ───────────────────────────────────────────────────────────
    // Nested joins
    // ───────────────────────────────────────────────────────────

    /// Run nested queries on join attributes of a resolver output
    ///
    /// Attributes whose nested value cannot satisfy the query are removed
    /// from the output so that an OR can fall through to its next branch.
    async fn process_output_joins(self: &Arc<Self>, mut output: Entity) -> (Entity, Option<GraphError>) {
        let mut first_error = None;
        let attrs: Vec<Attr> = output
            .keys()
            .filter(|k| self.joins.contains_key(k.as_str()))
            .map(|k| Attr::new(k))
            .collect();

        for attr in attrs {
            let Some(value) = output.get(attr.as_str()).cloned() else {
                continue;
            };
            match self.join(&attr, value).await {
                Joined::Kept(value) => {
                    self.joined.lock().insert(attr, Some(value));
                }
                Joined::Dropped(e) => {
                    output.remove(attr.as_str());
                    first_error.get_or_insert(e);
                }
            }
        }
        (output, first_error)
    }

    /// Joins on attributes that came with the data rather than a resolver
    async fn process_data_joins(self: &Arc<Self>) {
        let mut attrs: Vec<&Attr> = self
            .joins
            .keys()
            .filter(|a| self.graph.source_of(a.as_str()).is_none())
            .collect();
        attrs.sort();

        for attr in attrs {
            let Some(value) = self.store.get(attr.as_str()).filter(|v| !is_unknown(v)) else {
                continue;
            };
            match self.join(attr, value).await {
                Joined::Kept(value) => {
                    self.joined.lock().insert(attr.clone(), Some(value));
                }
                Joined::Dropped(e) => {
                    debug!(attr = %attr, code = e.code(), "data join dropped");
                    self.stats.warn(e);
                    self.joined.lock().insert(attr.clone(), None);
                }
            }
        }
    }

    async fn join(self: &Arc<Self>, attr: &Attr, value: Value) -> Joined {
        match self.joins.get(attr.as_str()).cloned() {
            Some(query) => self.join_with(attr, query, value).await,
            None => Joined::Kept(value),
        }
    }

    async fn join_with(self: &Arc<Self>, attr: &Attr, query: Request, value: Value) -> Joined {
        if self.depth + 1 > self.config().max_nested_depth {
            return Joined::Dropped(GraphError::NestedDepthExceeded {
                attr: attr.to_string(),
                max_depth: self.config().max_nested_depth,
            });
        }
        let query = Arc::new(query);

        match value {
            Value::Object(mut map) => {
                if map.len() == 1 && map.get(SET_KEY).is_some_and(Value::is_array) {
                    let items = match map.remove(SET_KEY) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    return self.join_set(attr, query, items).await;
                }
                let key = attr.to_string();
                let (entity, missing) = Arc::clone(self).sub_run(query, map, key, None).await;
                match entity {
                    Some(entity) => Joined::Kept(Value::Object(entity)),
                    None => Joined::Dropped(unsatisfied(attr, &missing)),
                }
            }
            Value::Array(items) => self.join_list(attr, query, items).await,
            other => Joined::Kept(other),
        }
    }

    /// Ordered collection: one task per element, shared batch barrier
    async fn join_list(self: &Arc<Self>, attr: &Attr, query: Arc<Request>, items: Vec<Value>) -> Joined {
        if items.is_empty() {
            return Joined::Kept(Value::Array(items));
        }
        let objects = items.iter().filter(|v| v.is_object()).count();
        let barrier = self.config().batching.then(|| BatchBarrier::new(objects));
        let total = items.len();

        let (kept, missing) = self
            .join_elements(attr, &query, items, |i| {
                barrier.as_ref().map(|b| BatchMode::Barrier(b.handle(i)))
            })
            .await;

        if kept.is_empty() {
            return Joined::Dropped(unsatisfied(attr, &missing));
        }
        debug!(attr = %attr, kept = kept.len(), total, "collection joined");
        Joined::Kept(Value::Array(kept))
    }

    /// Unordered set: no positional identity, so no batching
    async fn join_set(self: &Arc<Self>, attr: &Attr, query: Arc<Request>, items: Vec<Value>) -> Joined {
        if items.is_empty() {
            return Joined::Kept(set_value(items));
        }
        if self.config().batching && self.uses_batch_resolver(&query, &items) {
            let path = child_path(&self.path, attr.as_str());
            warn!(path = %path, "unordered collection, batch resolvers called per element");
            self.stats.warn(GraphError::UnsupportedBatchTarget { path });
        }

        let (kept, missing) = self
            .join_elements(attr, &query, items, |_| Some(BatchMode::Single))
            .await;
        if kept.is_empty() {
            return Joined::Dropped(unsatisfied(attr, &missing));
        }
        Joined::Kept(set_value(kept))
    }

    /// Run every element, reorder by index, drop unsatisfied elements
    async fn join_elements<F>(
        self: &Arc<Self>,
        attr: &Attr,
        query: &Arc<Request>,
        items: Vec<Value>,
        mut batch: F,
    ) -> (Vec<Value>, Vec<String>)
    where
        F: FnMut(usize) -> Option<BatchMode>,
    {
        let required = query.required_shape();
        let mut slots: Vec<Option<Value>> = vec![None; items.len()];
        let mut missing = Vec::new();
        let mut set = JoinSet::new();

        let mut element = 0;
        for (i, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(map) => {
                    let key = format!("{}[{}]", attr, i);
                    let mode = batch(element);
                    element += 1;
                    let scope = Arc::clone(self);
                    let query = Arc::clone(query);
                    set.spawn(async move { (i, scope.sub_run(query, map, key, mode).await) });
                }
                // Scalars carry no attributes to join on
                other if required.is_empty() => slots[i] = Some(other),
                _ => missing = required.attrs().map(|a| a.to_string()).collect(),
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, (Some(entity), _))) => slots[i] = Some(Value::Object(entity)),
                Ok((i, (None, absent))) => {
                    debug!(attr = %attr, element = i, missing = ?absent, "element dropped");
                    missing = absent;
                }
                Err(e) => warn!(attr = %attr, error = %e, "nested element task failed"),
            }
        }
        (slots.into_iter().flatten().collect(), missing)
    }

    /// Plan and run `query` against one nested entity
    ///
    /// Returns the shaped entity, or `None` with the missing required
    /// attributes.
    fn sub_run(
        self: Arc<Self>,
        query: Arc<Request>,
        data: Entity,
        key: String,
        batch: Option<BatchMode>,
    ) -> BoxFuture<'static, (Option<Entity>, Vec<String>)> {
        async move {
            let path = child_path(&self.path, &key);
            let stats = RunStats::new();
            let child = self
                .ctx
                .scope(&query, data, path, self.depth + 1, batch, stats.clone());

            let mut shaped = child.run_mutations(&query).await;
            Arc::clone(&child).execute().await;
            shaped.extend(child.shape(&query));
            // Releases this element's batch handle
            drop(child);
            self.stats.add_nested(key, stats);

            let missing: Vec<String> = query
                .required_shape()
                .attrs()
                .filter(|a| !shaped.contains_key(a.as_str()))
                .map(|a| a.to_string())
                .collect();
            if missing.is_empty() {
                (Some(shaped), missing)
            } else {
                (None, missing)
            }
        }
        .boxed()
    }

    fn uses_batch_resolver(&self, query: &Request, items: &[Value]) -> bool {
        items.iter().filter_map(Value::as_object).any(|item| {
            let graph = self.ctx.plan(query, &Shape::from_data(item));
            let batched = graph.nodes().any(|(_, node)| {
                node.as_resolver()
                    .and_then(|r| self.ctx.index.resolver(r.resolver.as_str()))
                    .is_some_and(|r| r.batch)
            });
            batched
        })
    }

    // ───────────────────────────────────────────────────────────
    // Mutations & result shaping
    // ───────────────────────────────────────────────────────────

    /// Execute mutation calls sequentially, in request order
    async fn run_mutations(self: &Arc<Self>, request: &Request) -> Entity {
        let mut results = Entity::new();
        for call in request.mutations() {
            let start_ms = self.stats.elapsed_ms();
            let ctx = ResolveContext {
                resolver: call.mutation.clone(),
                node: MUTATION_NODE,
                params: Some(call.params.clone()),
                path: self.path.clone(),
            };

            let outcome = match self.ctx.index.mutation(call.mutation.as_str()).cloned() {
                Some(mutation) => {
                    let ctx = &ctx;
                    self.config()
                        .extensions
                        .around_mutation(ctx, call.params.clone(), move |params| async move {
                            mutation.invoker().mutate(ctx, params).await
                        })
                        .await
                }
                None => Err(GraphError::UnknownMutation {
                    mutation: call.mutation.to_string(),
                }),
            };

            let outcome = match (outcome, &call.query) {
                (Ok(output), Some(query)) => {
                    let key = call.mutation.to_string();
                    let (shaped, missing) = Arc::clone(self)
                        .sub_run(Arc::new(query.clone()), output, key, None)
                        .await;
                    shaped.ok_or_else(|| unsatisfied(&Attr::new(call.mutation.as_str()), &missing))
                }
                (outcome, _) => outcome,
            };

            let (output, error) = match outcome {
                Ok(output) => {
                    results.insert(call.mutation.to_string(), Value::Object(output.clone()));
                    (Some(Value::Object(output)), None)
                }
                Err(e) => (None, Some(self.attach(&ctx, e))),
            };
            debug!(mutation = %call.mutation, failed = error.is_some(), "mutation finished");
            self.stats.record_mutation(MutationRun {
                mutation: call.mutation.clone(),
                start_ms,
                end_ms: self.stats.elapsed_ms(),
                params: call.params.clone(),
                output,
                error,
            });
        }
        results
    }

    /// Requested attributes, with processed join values
    fn shape(&self, request: &Request) -> Entity {
        let joined = self.joined.lock();
        let mut out = Entity::new();
        for entry in request.attrs() {
            let value = match joined.get(entry.attr.as_str()) {
                Some(processed) => processed.clone(),
                None => self.store.get(entry.attr.as_str()),
            };
            if let Some(value) = value.filter(|v| !is_unknown(v)) {
                out.insert(entry.attr.to_string(), value);
            }
        }
        out
    }
}

/// Keep declared top-level outputs, drop "not produced" sentinels
///
/// Attributes declared with a nested shape must carry an object, a
/// collection or null.
fn declared_output(resolver: &Resolver, output: Entity) -> Result<Entity> {
    let mut kept = Entity::new();
    for (attr, value) in output {
        if is_unknown(&value) {
            continue;
        }
        let Some(nested) = resolver.output.get(&attr) else {
            debug!(resolver = %resolver.id, attr = %attr, "undeclared output dropped");
            continue;
        };
        if !nested.is_empty() && !(value.is_object() || value.is_array() || value.is_null()) {
            return Err(GraphError::InvalidOutput {
                resolver: resolver.id.to_string(),
                reason: format!("'{}' declares nested attributes but holds {}", attr, value),
            });
        }
        kept.insert(attr, value);
    }
    Ok(kept)
}

/// Elements in a join value (1 for a single entity, `None` for scalars)
fn element_count(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => match map.get(SET_KEY) {
            Some(Value::Array(items)) if map.len() == 1 => Some(items.len()),
            _ => Some(1),
        },
        _ => None,
    }
}

fn unsatisfied(attr: &Attr, missing: &[String]) -> GraphError {
    GraphError::NestedUnsatisfied {
        attr: attr.to_string(),
        missing: if missing.is_empty() {
            "-".to_string()
        } else {
            missing.join(", ")
        },
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn set_value(items: Vec<Value>) -> Value {
    let mut set = Entity::new();
    set.insert(SET_KEY.to_string(), Value::Array(items));
    Value::Object(set)
}
