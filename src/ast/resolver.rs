//! Resolver and mutation declarations
//!
//! A resolver declares its input shape, optional inputs, output shape, batch
//! capability and priority, and carries an invocation capability behind the
//! [`Resolve`] trait. Immediate and suspending resolvers share the same async
//! boundary: a synchronous body is simply a future that is ready on first poll.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::attr::{Attr, ResolverId};
use super::shape::Shape;
use crate::error::{GraphError, Result};

/// Entity data: attribute name → JSON value
pub type Entity = Map<String, Value>;

/// Key of the sentinel object meaning "intentionally not produced"
pub const UNKNOWN_KEY: &str = "@unknown";

/// Sentinel a resolver returns for an output it deliberately does not produce
pub fn unknown_value() -> Value {
    json!({ UNKNOWN_KEY: true })
}

/// Check for the "intentionally not produced" sentinel
pub fn is_unknown(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get(UNKNOWN_KEY) == Some(&Value::Bool(true)))
}

/// Call-site information handed to a resolver body
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub resolver: ResolverId,
    /// Graph node performing the call
    pub node: u32,
    /// Parameters attached to the request entry, verbatim
    pub params: Option<Value>,
    /// Location of the entity in the result tree (`""` at the top)
    pub path: String,
}

/// Output of a batch call
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    /// One output per input, same order
    Positional(Vec<Entity>),
    /// Outputs carrying the value of `key` from their input, any order
    Keyed { key: Attr, items: Vec<Entity> },
}

/// Invocation capability of a resolver
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve one entity
    async fn resolve(&self, ctx: &ResolveContext, input: Entity) -> Result<Entity>;

    /// Resolve an ordered collection of inputs in one call
    ///
    /// The default calls [`Resolve::resolve`] once per input.
    async fn resolve_batch(&self, ctx: &ResolveContext, inputs: Vec<Entity>) -> Result<BatchOutput> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            outputs.push(self.resolve(ctx, input).await?);
        }
        Ok(BatchOutput::Positional(outputs))
    }
}

/// Invocation capability of a mutation
#[async_trait]
pub trait Mutate: Send + Sync {
    async fn mutate(&self, ctx: &ResolveContext, params: Value) -> Result<Entity>;
}

// ═══════════════════════════════════════════════════════════════
// Closure adapters
// ═══════════════════════════════════════════════════════════════

struct SyncFn<F>(F);

#[async_trait]
impl<F> Resolve for SyncFn<F>
where
    F: Fn(&ResolveContext, Entity) -> Result<Entity> + Send + Sync,
{
    async fn resolve(&self, ctx: &ResolveContext, input: Entity) -> Result<Entity> {
        (self.0)(ctx, input)
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> Resolve for AsyncFn<F>
where
    F: Fn(ResolveContext, Entity) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Entity>> + Send + 'static,
{
    async fn resolve(&self, ctx: &ResolveContext, input: Entity) -> Result<Entity> {
        (self.0)(ctx.clone(), input).await
    }
}

struct BatchFn<F>(F);

#[async_trait]
impl<F> Resolve for BatchFn<F>
where
    F: Fn(&ResolveContext, Vec<Entity>) -> Result<BatchOutput> + Send + Sync,
{
    async fn resolve(&self, ctx: &ResolveContext, input: Entity) -> Result<Entity> {
        match (self.0)(ctx, vec![input])? {
            BatchOutput::Positional(mut items) | BatchOutput::Keyed { mut items, .. }
                if items.len() == 1 =>
            {
                Ok(items.remove(0))
            }
            BatchOutput::Positional(items) | BatchOutput::Keyed { items, .. } => {
                Err(GraphError::BatchMismatch {
                    resolver: ctx.resolver.to_string(),
                    expected: 1,
                    actual: items.len(),
                })
            }
        }
    }

    async fn resolve_batch(&self, ctx: &ResolveContext, inputs: Vec<Entity>) -> Result<BatchOutput> {
        (self.0)(ctx, inputs)
    }
}

struct MutateFn<F>(F);

#[async_trait]
impl<F> Mutate for MutateFn<F>
where
    F: Fn(&ResolveContext, Value) -> Result<Entity> + Send + Sync,
{
    async fn mutate(&self, ctx: &ResolveContext, params: Value) -> Result<Entity> {
        (self.0)(ctx, params)
    }
}

// ═══════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════

/// A registered transformation from input attributes to output attributes
#[derive(Clone)]
pub struct Resolver {
    pub id: ResolverId,
    pub input: Shape,
    pub optional_input: Shape,
    pub output: Shape,
    pub batch: bool,
    /// Higher wins when alternatives compete (default 0)
    pub priority: i64,
    invoke: Arc<dyn Resolve>,
}

impl Resolver {
    pub fn builder(id: impl Into<ResolverId>) -> ResolverBuilder {
        ResolverBuilder {
            id: id.into(),
            input: Shape::new(),
            optional_input: Shape::new(),
            output: Shape::new(),
            priority: 0,
        }
    }

    pub fn invoker(&self) -> &Arc<dyn Resolve> {
        &self.invoke
    }

    /// Top-level output attributes
    pub fn provides(&self) -> impl Iterator<Item = &Attr> {
        self.output.attrs()
    }

    /// Required and optional input merged (the projection shape)
    pub fn input_projection(&self) -> Shape {
        let mut shape = self.input.clone();
        shape.merge(&self.optional_input);
        shape
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("optional_input", &self.optional_input)
            .field("output", &self.output)
            .field("batch", &self.batch)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Resolver`]
pub struct ResolverBuilder {
    id: ResolverId,
    input: Shape,
    optional_input: Shape,
    output: Shape,
    priority: i64,
}

impl ResolverBuilder {
    pub fn input<I, A>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attr>,
    {
        self.input.merge(&Shape::leaf(attrs));
        self
    }

    pub fn input_shape(mut self, shape: Shape) -> Self {
        self.input.merge(&shape);
        self
    }

    pub fn optional<I, A>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attr>,
    {
        self.optional_input.merge(&Shape::leaf(attrs));
        self
    }

    pub fn output<I, A>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attr>,
    {
        self.output.merge(&Shape::leaf(attrs));
        self
    }

    pub fn output_shape(mut self, shape: Shape) -> Self {
        self.output.merge(&shape);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    fn finish(self, batch: bool, invoke: Arc<dyn Resolve>) -> Resolver {
        Resolver {
            id: self.id,
            input: self.input,
            optional_input: self.optional_input,
            output: self.output,
            batch,
            priority: self.priority,
            invoke,
        }
    }

    /// Synchronous body
    pub fn sync<F>(self, f: F) -> Resolver
    where
        F: Fn(&ResolveContext, Entity) -> Result<Entity> + Send + Sync + 'static,
    {
        self.finish(false, Arc::new(SyncFn(f)))
    }

    /// Suspending body
    pub fn run_async<F, Fut>(self, f: F) -> Resolver
    where
        F: Fn(ResolveContext, Entity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Entity>> + Send + 'static,
    {
        self.finish(false, Arc::new(AsyncFn(f)))
    }

    /// Batch body: receives the ordered input collection
    pub fn batch<F>(self, f: F) -> Resolver
    where
        F: Fn(&ResolveContext, Vec<Entity>) -> Result<BatchOutput> + Send + Sync + 'static,
    {
        self.finish(true, Arc::new(BatchFn(f)))
    }

    /// Custom [`Resolve`] implementation
    pub fn with(self, invoke: Arc<dyn Resolve>, batch: bool) -> Resolver {
        self.finish(batch, invoke)
    }
}

// ═══════════════════════════════════════════════════════════════
// Mutation
// ═══════════════════════════════════════════════════════════════

/// A registered side-effecting operation invoked by request entries
#[derive(Clone)]
pub struct Mutation {
    pub id: ResolverId,
    pub output: Shape,
    invoke: Arc<dyn Mutate>,
}

impl Mutation {
    pub fn new<F>(id: impl Into<ResolverId>, output: Shape, f: F) -> Self
    where
        F: Fn(&ResolveContext, Value) -> Result<Entity> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            output,
            invoke: Arc::new(MutateFn(f)),
        }
    }

    pub fn with(id: impl Into<ResolverId>, output: Shape, invoke: Arc<dyn Mutate>) -> Self {
        Self {
            id: id.into(),
            output,
            invoke,
        }
    }

    pub fn invoker(&self) -> &Arc<dyn Mutate> {
        &self.invoke
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("id", &self.id)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str) -> ResolveContext {
        ResolveContext {
            resolver: ResolverId::new(id),
            node: 1,
            params: None,
            path: String::new(),
        }
    }

    #[test]
    fn unknown_sentinel_detection() {
        assert!(is_unknown(&unknown_value()));
        assert!(!is_unknown(&json!({"@unknown": true, "x": 1})));
        assert!(!is_unknown(&json!(null)));
    }

    #[tokio::test]
    async fn sync_resolver_is_ready_future() {
        let r = Resolver::builder("double")
            .input(["n"])
            .output(["twice"])
            .sync(|_, input| {
                let n = input["n"].as_i64().unwrap_or(0);
                Ok(Map::from_iter([("twice".to_string(), json!(n * 2))]))
            });
        let mut input = Entity::new();
        input.insert("n".into(), json!(21));
        let out = r.invoker().resolve(&ctx("double"), input).await.unwrap();
        assert_eq!(out["twice"], json!(42));
        assert!(!r.batch);
    }

    #[tokio::test]
    async fn default_batch_calls_resolve_per_item() {
        let r = Resolver::builder("echo")
            .input(["n"])
            .output(["m"])
            .sync(|_, input| Ok(Map::from_iter([("m".to_string(), input["n"].clone())])));
        let inputs: Vec<Entity> = (0..3)
            .map(|i| Map::from_iter([("n".to_string(), json!(i))]))
            .collect();
        let out = r.invoker().resolve_batch(&ctx("echo"), inputs).await.unwrap();
        match out {
            BatchOutput::Positional(items) => {
                let values: Vec<Value> = items.iter().map(|e| e["m"].clone()).collect();
                assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
            }
            BatchOutput::Keyed { .. } => panic!("expected positional output"),
        }
    }

    #[tokio::test]
    async fn batch_resolver_single_call_unwraps() {
        let r = Resolver::builder("bulk")
            .input(["id"])
            .output(["name"])
            .batch(|_, inputs| {
                Ok(BatchOutput::Positional(
                    inputs
                        .iter()
                        .map(|i| Map::from_iter([("name".to_string(), json!(format!("n{}", i["id"])))]))
                        .collect(),
                ))
            });
        assert!(r.batch);
        let out = r
            .invoker()
            .resolve(&ctx("bulk"), Map::from_iter([("id".to_string(), json!(7))]))
            .await
            .unwrap();
        assert_eq!(out["name"], json!("n7"));
    }

    #[test]
    fn input_projection_merges_optional() {
        let r = Resolver::builder("r")
            .input(["a"])
            .optional(["b"])
            .output(["c"])
            .sync(|_, _| Ok(Entity::new()));
        let projection = r.input_projection();
        assert!(projection.contains("a"));
        assert!(projection.contains("b"));
        assert_eq!(r.provides().count(), 1);
    }
}
