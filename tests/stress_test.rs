//! Stress tests for large graphs and collections

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use attrgraph::{BatchOutput, Index, Request, Resolver, Runner};
use common::e;
use serde_json::{json, Value};

#[tokio::test]
#[ignore] // Run with: cargo test stress_test -- --ignored
async fn test_large_collection_single_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let index = Index::from_resolvers([Resolver::builder("double")
        .input(["n"])
        .output(["double"])
        .batch(move |_, inputs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BatchOutput::Positional(
                inputs
                    .iter()
                    .map(|i| e(json!({"double": i["n"].as_i64().unwrap_or(0) * 2})))
                    .collect(),
            ))
        })]);
    let items: Vec<Value> = (0..5_000).map(|n| json!({"n": n})).collect();
    let request = Request::new().join("items", Request::from_attrs(["double"]));

    let start = Instant::now();
    let out = Runner::new(index)
        .run(&request, e(json!({"items": items})))
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.result["items"][4_999], json!({"double": 9_998}));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
#[ignore]
async fn test_long_dependency_chain() {
    let len = 300;
    let resolvers = (1..=len).map(|i| {
        let out = format!("a{}", i);
        Resolver::builder(format!("step-{}", i))
            .input([format!("a{}", i - 1)])
            .output([out.clone()])
            .sync(move |_, input| {
                let prev = input.values().next().and_then(Value::as_i64).unwrap_or(0);
                Ok(e(json!({ out.as_str(): prev + 1 })))
            })
    });
    let index = Index::from_resolvers(resolvers);
    let request = Request::from_attrs([format!("a{}", len)]);

    let out = Runner::new(index).run(&request, e(json!({"a0": 0}))).await;

    assert_eq!(out.result[&format!("a{}", len)], json!(len));
    assert_eq!(out.stats.len(), len);
}
