//! Extension seams - enter/leave hooks around the runner's side effects
//!
//! The runner goes through [`Extensions`] for every resolver invocation,
//! mutation invocation, error attachment, attribute write-back and whole-graph
//! execution. Enter hooks run in priority order (lower first), leave hooks
//! in reverse, so extensions nest like middleware.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::{Entity, ResolveContext};
use crate::error::{GraphError, Result};
use crate::plan::ExecutionGraph;
use crate::stats::RunStats;

/// Interception points; every hook defaults to a no-op
#[allow(unused_variables)]
pub trait Extension: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Execution priority (lower runs first). Default is 100.
    fn priority(&self) -> i32 {
        100
    }

    fn graph_enter(&self, graph: &ExecutionGraph, path: &str) {}

    fn graph_leave(&self, graph: &ExecutionGraph, path: &str, stats: &RunStats) {}

    /// May rewrite the projected input
    fn resolver_enter(&self, ctx: &ResolveContext, input: &mut Entity) {}

    /// May rewrite the result (success or error)
    fn resolver_leave(&self, ctx: &ResolveContext, result: &mut Result<Entity>) {}

    fn mutation_enter(&self, ctx: &ResolveContext, params: &mut Value) {}

    fn mutation_leave(&self, ctx: &ResolveContext, result: &mut Result<Entity>) {}

    /// May rewrite an error before it is recorded
    fn error_enter(&self, ctx: &ResolveContext, error: &mut GraphError) {}

    fn error_leave(&self, ctx: &ResolveContext, error: &GraphError) {}

    /// May rewrite the values about to be merged at `path`
    fn write_enter(&self, path: &str, output: &mut Entity) {}

    /// Called with the attributes actually written
    fn write_leave(&self, path: &str, written: &[String]) {}
}

/// Ordered extension stack
#[derive(Clone, Default)]
pub struct Extensions {
    list: Vec<Arc<dyn Extension>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension, keeping priority order (stable for equal priorities)
    pub fn push(&mut self, extension: Arc<dyn Extension>) {
        let at = self
            .list
            .partition_point(|e| e.priority() <= extension.priority());
        self.list.insert(at, extension);
    }

    pub fn with(mut self, extension: Arc<dyn Extension>) -> Self {
        self.push(extension);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.list.iter().map(|e| e.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub async fn around_graph<F, Fut>(
        &self,
        graph: &ExecutionGraph,
        path: &str,
        stats: &RunStats,
        run: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        for ext in &self.list {
            ext.graph_enter(graph, path);
        }
        run().await;
        for ext in self.list.iter().rev() {
            ext.graph_leave(graph, path, stats);
        }
    }

    pub async fn around_resolver<F, Fut>(
        &self,
        ctx: &ResolveContext,
        mut input: Entity,
        call: F,
    ) -> Result<Entity>
    where
        F: FnOnce(Entity) -> Fut,
        Fut: Future<Output = Result<Entity>>,
    {
        for ext in &self.list {
            ext.resolver_enter(ctx, &mut input);
        }
        let mut result = call(input).await;
        for ext in self.list.iter().rev() {
            ext.resolver_leave(ctx, &mut result);
        }
        result
    }

    pub async fn around_mutation<F, Fut>(
        &self,
        ctx: &ResolveContext,
        mut params: Value,
        call: F,
    ) -> Result<Entity>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Entity>>,
    {
        for ext in &self.list {
            ext.mutation_enter(ctx, &mut params);
        }
        let mut result = call(params).await;
        for ext in self.list.iter().rev() {
            ext.mutation_leave(ctx, &mut result);
        }
        result
    }

    /// Pass an error through the stack, then hand it to `record`
    pub fn attach_error<F>(&self, ctx: &ResolveContext, mut error: GraphError, record: F) -> GraphError
    where
        F: FnOnce(&GraphError),
    {
        for ext in &self.list {
            ext.error_enter(ctx, &mut error);
        }
        record(&error);
        for ext in self.list.iter().rev() {
            ext.error_leave(ctx, &error);
        }
        error
    }

    /// Pass an output through the stack, then hand it to `write`
    ///
    /// Returns the output as the stack left it, with the attributes written.
    pub fn around_write<F>(&self, path: &str, mut output: Entity, write: F) -> (Entity, Vec<String>)
    where
        F: FnOnce(Entity) -> Vec<String>,
    {
        for ext in &self.list {
            ext.write_enter(path, &mut output);
        }
        let written = write(output.clone());
        for ext in self.list.iter().rev() {
            ext.write_leave(path, &written);
        }
        (output, written)
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ResolverId;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Tracer {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Extension for Tracer {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn resolver_enter(&self, _ctx: &ResolveContext, input: &mut Entity) {
            self.log.lock().push(format!("enter:{}", self.name));
            input.insert(self.name.to_string(), json!(true));
        }

        fn resolver_leave(&self, _ctx: &ResolveContext, _result: &mut Result<Entity>) {
            self.log.lock().push(format!("leave:{}", self.name));
        }
    }

    fn ctx() -> ResolveContext {
        ResolveContext {
            resolver: ResolverId::new("r"),
            node: 0,
            params: None,
            path: String::new(),
        }
    }

    #[tokio::test]
    async fn hooks_nest_by_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exts = Extensions::new()
            .with(Arc::new(Tracer {
                name: "outer-late",
                priority: 200,
                log: Arc::clone(&log),
            }))
            .with(Arc::new(Tracer {
                name: "inner-early",
                priority: 10,
                log: Arc::clone(&log),
            }));

        let result = exts
            .around_resolver(&ctx(), Entity::new(), |input| async move { Ok(input) })
            .await
            .unwrap();

        assert!(result.contains_key("outer-late"));
        assert!(result.contains_key("inner-early"));
        assert_eq!(
            *log.lock(),
            vec![
                "enter:inner-early",
                "enter:outer-late",
                "leave:outer-late",
                "leave:inner-early"
            ]
        );
    }

    struct Renamer;

    impl Extension for Renamer {
        fn name(&self) -> &str {
            "renamer"
        }

        fn error_enter(&self, _ctx: &ResolveContext, error: &mut GraphError) {
            *error = GraphError::resolver("renamed", error.to_string());
        }
    }

    #[test]
    fn error_hook_rewrites_before_record() {
        let exts = Extensions::new().with(Arc::new(Renamer));
        let mut seen = None;
        let err = exts.attach_error(&ctx(), GraphError::resolver("r", "boom"), |e| {
            seen = Some(e.clone())
        });
        assert_eq!(seen, Some(err.clone()));
        assert!(err.to_string().contains("renamed"));
    }

    #[test]
    fn empty_stack_writes_through() {
        let exts = Extensions::new();
        let mut out = Entity::new();
        out.insert("a".into(), json!(1));
        let (out, written) = exts.around_write("", out, |o| o.keys().cloned().collect());
        assert_eq!(written, vec!["a".to_string()]);
        assert_eq!(out["a"], json!(1));
    }
}
