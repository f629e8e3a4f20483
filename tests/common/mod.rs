//! Shared fixtures for integration tests

#![allow(dead_code)]

use attrgraph::{Entity, GraphError, Index, Resolver};
use serde_json::{json, Value};

/// Object literal → entity
pub fn e(value: Value) -> Entity {
    value.as_object().cloned().unwrap_or_default()
}

/// `pi: () → 3.14159`, `tau: (pi) → pi * 2`
pub fn pi_tau() -> Index {
    Index::from_resolvers([
        Resolver::builder("pi")
            .output(["pi"])
            .sync(|_, _| Ok(e(json!({"pi": 3.14159})))),
        Resolver::builder("tau")
            .input(["pi"])
            .output(["tau"])
            .sync(|_, input| {
                let pi = input["pi"].as_f64().unwrap_or_default();
                Ok(e(json!({"tau": pi * 2.0})))
            }),
    ])
}

/// `width: (x, x2) → x * x2`, `area: (width, height) → width * height`
pub fn width_area() -> Index {
    Index::from_resolvers([
        Resolver::builder("width")
            .input(["x", "x2"])
            .output(["width"])
            .sync(|ctx, input| {
                let x = number(ctx.resolver.as_str(), &input, "x")?;
                let x2 = number(ctx.resolver.as_str(), &input, "x2")?;
                Ok(e(json!({"width": x * x2})))
            }),
        Resolver::builder("area")
            .input(["width", "height"])
            .output(["area"])
            .sync(|ctx, input| {
                let w = number(ctx.resolver.as_str(), &input, "width")?;
                let h = number(ctx.resolver.as_str(), &input, "height")?;
                Ok(e(json!({"area": w * h})))
            }),
    ])
}

pub fn number(resolver: &str, input: &Entity, attr: &str) -> Result<f64, GraphError> {
    input
        .get(attr)
        .and_then(Value::as_f64)
        .ok_or_else(|| GraphError::resolver(resolver, format!("'{}' is not numeric", attr)))
}
