//! Tests for the graph Runner
//!
//! Coverage targets:
//! - pi/tau and width/area scenarios
//! - OR priority selection and fall-through
//! - unreachable diagnostics
//! - AND concurrency, at-most-once node execution
//! - optional inputs, params, extension seams

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attrgraph::{
    AttrRequest, Entity, Extension, GraphError, Index, NodeStatus, Outcome, Request,
    ResolveContext, Resolver, RunConfig, Runner,
};
use common::{e, pi_tau, width_area};
use serde_json::json;

// =============================================================================
// Scenarios
// =============================================================================

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pi_tau() {
        let out = Runner::new(pi_tau())
            .run(&Request::from_attrs(["tau"]), Entity::new())
            .await;

        assert_eq!(out.result, e(json!({"tau": 6.28318})));
        assert_eq!(out.graph.node_count(), 2);

        let pi = out.graph.source_of("pi").unwrap();
        let tau = out.graph.source_of("tau").unwrap();
        assert_eq!(out.graph.root(), Some(tau));
        assert_eq!(out.graph.node(pi).unwrap().next(), Some(tau));
        assert!(out.graph.validate().is_ok());
    }

    #[tokio::test]
    async fn test_width_area_direct_and_ancestor() {
        let data = e(json!({"x": 3, "x2": "wide", "height": 4}));
        let out = Runner::new(width_area())
            .run(&Request::from_attrs(["area"]), data)
            .await;

        assert!(out.result.is_empty());

        let width = out.graph.source_of("width").unwrap();
        let area = out.graph.source_of("area").unwrap();

        let width_run = out.stats.node(width).unwrap();
        assert_eq!(width_run.status, NodeStatus::Failed);
        assert_eq!(width_run.error.as_ref().unwrap().code(), "AG-020");
        assert_eq!(out.stats.node(area).unwrap().status, NodeStatus::Skipped);

        match out.outcome("area") {
            Outcome::Ancestor { node, error } => {
                assert_eq!(node, width);
                assert!(error.to_string().contains("'x2' is not numeric"));
            }
            other => panic!("expected Ancestor, got {:?}", other),
        }
        assert!(matches!(out.outcome("width"), Outcome::Direct { node, .. } if node == width));
    }

    #[tokio::test]
    async fn test_width_area_success() {
        let data = e(json!({"x": 3, "x2": 2, "height": 4}));
        let out = Runner::new(width_area())
            .run(&Request::from_attrs(["area"]), data)
            .await;
        assert_eq!(out.result, e(json!({"area": 24.0})));
        assert!(out.errors().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_resolvers_do_not_change_result() {
        let noisy = pi_tau()
            .register(
                Resolver::builder("unrelated")
                    .input(["tau"])
                    .output(["other"])
                    .sync(|_, _| Err(GraphError::resolver("unrelated", "never called"))),
            )
            .register(
                Resolver::builder("lonely")
                    .output(["solo"])
                    .sync(|_, _| Ok(e(json!({"solo": 1})))),
            );

        let plain = Runner::new(pi_tau())
            .run(&Request::from_attrs(["tau"]), Entity::new())
            .await;
        let with_noise = Runner::new(noisy)
            .run(&Request::from_attrs(["tau"]), Entity::new())
            .await;
        assert_eq!(plain.result, with_noise.result);
        assert_eq!(with_noise.stats.len(), 2);
    }
}

// =============================================================================
// Unreachable diagnostics
// =============================================================================

mod unreachable {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_path_is_absent_and_diagnosed() {
        let out = Runner::new(pi_tau())
            .run(&Request::from_attrs(["tau", "ghost"]), Entity::new())
            .await;

        assert_eq!(out.result, e(json!({"tau": 6.28318})));
        assert!(out.graph.is_unreachable("ghost"));
        assert_eq!(out.outcome("ghost"), Outcome::Unreachable);
        assert!(out.errors().is_empty());
    }

    #[tokio::test]
    async fn test_dependant_of_unreachable_is_pruned() {
        let index = Index::from_resolvers([Resolver::builder("b")
            .input(["ghost"])
            .output(["b"])
            .sync(|_, _| Ok(e(json!({"b": 1}))))]);
        let out = Runner::new(index)
            .run(&Request::from_attrs(["b"]), Entity::new())
            .await;

        assert!(out.result.is_empty());
        assert!(out.graph.is_unreachable("b"));
        assert!(out.graph.is_empty());
        assert!(out.stats.is_empty());
    }

    #[tokio::test]
    async fn test_optional_entry_never_blocks() {
        let out = Runner::new(pi_tau())
            .run(&Request::new().attr("tau").optional("ghost"), Entity::new())
            .await;
        assert_eq!(out.result, e(json!({"tau": 6.28318})));
    }
}

// =============================================================================
// OR selection
// =============================================================================

mod choose_path {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, priority: i64, succeeds: bool) -> Resolver {
        let name = id.to_string();
        Resolver::builder(id)
            .output(["x"])
            .priority(priority)
            .sync(move |_, _| {
                if succeeds {
                    Ok(e(json!({ "x": name.clone() })))
                } else {
                    Err(GraphError::resolver(name.as_str(), "unavailable"))
                }
            })
    }

    #[tokio::test]
    async fn test_highest_priority_success_wins() {
        let index = Index::from_resolvers([
            candidate("low", 1, true),
            candidate("top", 9, false),
            candidate("mid", 5, true),
        ]);
        let out = Runner::new(index)
            .run(&Request::from_attrs(["x"]), Entity::new())
            .await;

        assert_eq!(out.result["x"], json!("mid"));
        let attempted: Vec<String> = out
            .stats
            .nodes()
            .iter()
            .map(|r| r.resolver.to_string())
            .collect();
        assert!(attempted.contains(&"top".to_string()));
        assert!(attempted.contains(&"mid".to_string()));
        assert!(!attempted.contains(&"low".to_string()));
        assert_eq!(out.outcome("x"), Outcome::Resolved);
    }

    #[tokio::test]
    async fn test_all_branches_failing_is_direct() {
        let index = Index::from_resolvers([candidate("a", 1, false), candidate("b", 0, false)]);
        let out = Runner::new(index)
            .run(&Request::from_attrs(["x"]), Entity::new())
            .await;

        assert!(out.result.is_empty());
        assert_eq!(out.stats.failed_nodes().len(), 2);
        assert!(matches!(out.outcome("x"), Outcome::Direct { .. }));
    }

    #[tokio::test]
    async fn test_planned_order_chooser_is_injectable() {
        struct Reverse;
        impl attrgraph::PathChooser for Reverse {
            fn order(
                &self,
                _graph: &attrgraph::ExecutionGraph,
                _index: &Index,
                or: &attrgraph::plan::OrNode,
            ) -> Vec<attrgraph::NodeId> {
                or.branches.iter().rev().copied().collect()
            }
        }

        let index = Index::from_resolvers([candidate("a", 5, true), candidate("b", 1, true)]);
        let config = RunConfig::default().with_chooser(Arc::new(Reverse));
        let out = Runner::with_config(index, config)
            .run(&Request::from_attrs(["x"]), Entity::new())
            .await;
        assert_eq!(out.result["x"], json!("b"));
    }

    fn constant(id: &str, input: &[&str], attr: &'static str, value: &'static str, priority: i64) -> Resolver {
        Resolver::builder(id)
            .input(input.iter().copied())
            .output([attr])
            .priority(priority)
            .sync(move |_, _| {
                let mut out = Entity::new();
                out.insert(attr.to_string(), json!(value));
                Ok(out)
            })
    }

    /// p needs q on one path, the preferred q needs p
    fn cyclic_index() -> Index {
        Index::from_resolvers([
            constant("p1", &["q"], "p", "from-q", 0),
            constant("p2", &[], "p", "plain", 0),
            constant("q1", &["p"], "q", "high", 10),
            constant("q2", &["r"], "q", "low", 0),
            constant("r", &[], "r", "r", 0),
        ])
    }

    #[tokio::test]
    async fn test_cycle_does_not_depend_on_other_entries() {
        let runner = Runner::new(cyclic_index());
        let alone = runner.run(&Request::from_attrs(["q"]), Entity::new()).await;
        let both = runner
            .run(&Request::from_attrs(["p", "q"]), Entity::new())
            .await;
        let reversed = runner
            .run(&Request::from_attrs(["q", "p"]), Entity::new())
            .await;

        assert_eq!(alone.result["q"], json!("high"));
        assert_eq!(both.result["q"], json!("high"));
        assert_eq!(reversed.result["q"], json!("high"));
        assert_eq!(both.result["p"], json!("plain"));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_and_branches_run_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let make = |attr: &'static str| {
            let barrier = Arc::clone(&barrier);
            Resolver::builder(attr)
                .output([attr])
                .run_async(move |_, _| {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        // Both branches must be in flight to pass
                        barrier.wait().await;
                        Ok(Entity::from_iter([(attr.to_string(), json!(true))]))
                    }
                })
        };
        let index = Index::from_resolvers([make("left"), make("right")]);

        let out = tokio::time::timeout(
            Duration::from_secs(5),
            Runner::new(index).run(&Request::from_attrs(["left", "right"]), Entity::new()),
        )
        .await
        .expect("AND branches were serialized");
        assert_eq!(out.result, e(json!({"left": true, "right": true})));
    }

    #[tokio::test]
    async fn test_shared_node_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let index = Index::from_resolvers([
            Resolver::builder("base")
                .output(["base"])
                .sync(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(e(json!({"base": 1})))
                }),
            Resolver::builder("left")
                .input(["base"])
                .output(["left"])
                .sync(|_, i| Ok(e(json!({"left": i["base"].as_i64().unwrap_or(0) + 1})))),
            Resolver::builder("right")
                .input(["base"])
                .output(["right"])
                .sync(|_, i| Ok(e(json!({"right": i["base"].as_i64().unwrap_or(0) + 2})))),
            Resolver::builder("top")
                .input(["left", "right"])
                .output(["top"])
                .sync(|_, i| {
                    let sum = i["left"].as_i64().unwrap_or(0) + i["right"].as_i64().unwrap_or(0);
                    Ok(e(json!({ "top": sum })))
                }),
        ]);
        let out = Runner::new(index)
            .run(&Request::from_attrs(["top"]), Entity::new())
            .await;

        assert_eq!(out.result["top"], json!(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_deterministic() {
        let runner = Runner::new(width_area());
        let data = e(json!({"x": 3, "x2": 2, "height": 4}));
        let first = runner.run(&Request::from_attrs(["area"]), data.clone()).await;
        let second = runner.run(&Request::from_attrs(["area"]), data).await;

        assert_eq!(first.result, second.result);
        assert_eq!(first.graph.to_json(), second.graph.to_json());
    }
}

// =============================================================================
// Inputs, params, extensions
// =============================================================================

mod seams {
    use super::*;
    use pretty_assertions::assert_eq;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_optional_input_is_non_fatal() {
        let index = Index::from_resolvers([Resolver::builder("label")
            .input(["id"])
            .optional(["nickname"])
            .output(["label"])
            .sync(|_, input| {
                let label = match input.get("nickname") {
                    Some(nick) => nick.clone(),
                    None => json!(format!("user-{}", input["id"])),
                };
                Ok(e(json!({ "label": label })))
            })]);
        let runner = Runner::new(index);

        let out = runner
            .run(&Request::from_attrs(["label"]), e(json!({"id": 7})))
            .await;
        assert_eq!(out.result["label"], json!("user-7"));

        let out = runner
            .run(
                &Request::from_attrs(["label"]),
                e(json!({"id": 7, "nickname": "seven"})),
            )
            .await;
        assert_eq!(out.result["label"], json!("seven"));
    }

    #[tokio::test]
    async fn test_params_passed_verbatim() {
        let index = Index::from_resolvers([Resolver::builder("greeting")
            .output(["greeting"])
            .sync(|ctx, _| {
                let lang = ctx
                    .params
                    .as_ref()
                    .and_then(|p| p.get("lang"))
                    .cloned()
                    .unwrap_or(json!("en"));
                Ok(e(json!({ "greeting": lang })))
            })]);
        let request = Request::new()
            .item(AttrRequest::new("greeting").with_params(json!({"lang": "fr", "extra": [1]})));
        let out = Runner::new(index).run(&request, Entity::new()).await;
        assert_eq!(out.result["greeting"], json!("fr"));
        assert_eq!(out.graph.node_count(), 1);
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Extension for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn graph_enter(&self, _graph: &attrgraph::ExecutionGraph, path: &str) {
            self.events.lock().push(format!("graph:{}", path));
        }

        fn resolver_enter(&self, ctx: &ResolveContext, input: &mut Entity) {
            self.events.lock().push(format!("resolve:{}", ctx.resolver));
            if ctx.resolver.as_str() == "width" {
                input.insert("x2".into(), json!(10));
            }
        }

        fn error_enter(&self, _ctx: &ResolveContext, error: &mut GraphError) {
            *error = GraphError::resolver("rewritten", error.to_string());
        }

        fn write_leave(&self, path: &str, written: &[String]) {
            self.events
                .lock()
                .push(format!("write:{}:{}", path, written.join(",")));
        }
    }

    #[tokio::test]
    async fn test_extension_rewrites_input() {
        let recorder = Arc::new(Recorder::default());
        let config = RunConfig::default().with_extension(recorder.clone());
        let data = e(json!({"x": 3, "x2": "wide", "height": 4}));
        let out = Runner::with_config(width_area(), config)
            .run(&Request::from_attrs(["area"]), data)
            .await;

        assert_eq!(out.result["area"], json!(120.0));
        let events = recorder.events.lock().clone();
        assert_eq!(events.first().map(String::as_str), Some("graph:"));
        assert!(events.contains(&"resolve:width".to_string()));
        assert!(events.contains(&"write::width".to_string()));
        assert!(events.contains(&"write::area".to_string()));
    }

    #[tokio::test]
    async fn test_extension_rewrites_recorded_errors() {
        let config = RunConfig::default().with_extension(Arc::new(Recorder::default()));
        let index = Index::from_resolvers([Resolver::builder("boom")
            .output(["boom"])
            .sync(|_, _| Err(GraphError::resolver("boom", "kaput")))]);
        let out = Runner::with_config(index, config)
            .run(&Request::from_attrs(["boom"]), Entity::new())
            .await;

        let errors = out.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("'rewritten'"));
        assert!(errors[0].to_string().contains("kaput"));
    }

    struct Uppercase;

    impl Extension for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn write_enter(&self, _path: &str, output: &mut Entity) {
            for value in output.values_mut() {
                if let Some(text) = value.as_str() {
                    *value = json!(text.to_uppercase());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_run_record_holds_written_output() {
        let index = Index::from_resolvers([Resolver::builder("shout")
            .output(["shout"])
            .sync(|_, _| Ok(e(json!({"shout": "hey"}))))]);
        let config = RunConfig::default().with_extension(Arc::new(Uppercase));
        let out = Runner::with_config(index, config)
            .run(&Request::from_attrs(["shout"]), Entity::new())
            .await;

        assert_eq!(out.result["shout"], json!("HEY"));
        let runs = out.stats.nodes();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].output, Some(json!({"shout": "HEY"})));
    }
}
