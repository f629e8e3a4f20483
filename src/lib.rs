//! attrgraph - attribute resolution engine (v0.1)
//!
//! Callers ask for attributes; attrgraph finds the resolvers that can
//! produce them, plans an execution graph, and runs it.
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       Attr, Shape, Request, Resolver, Document         │
//! │  index/     attribute → alternatives (immutable, shared)     │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  plan/      Planner, ExecutionGraph, PlanCache               │
//! │  runtime/   Runner, batch barrier, choosers, extensions      │
//! │  stats/     RunStats, outcome classification                 │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  util/      interning, xxh3 fingerprints                     │
//! │  config     Settings (TOML + env)                            │
//! │  error      GraphError with codes and fix suggestions        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Attributes, shapes, requests, resolver declarations, YAML documents |
//! | [`index`] | Attribute index with deterministic alternatives |
//! | [`plan`] | Pure planner, execution graph invariants, plan cache |
//! | [`runtime`] | Graph execution with tokio concurrency |
//! | [`stats`] | Per-node run records and Direct/Ancestor diagnostics |
//! | [`util`] | String interning, fingerprints |
//! | [`config`] | Persistent run defaults |
//! | [`error`] | Error types with fix suggestions |
//!
//! ## Example
//!
//! ```no_run
//! use attrgraph::{Entity, Index, Request, Resolver, Runner};
//! use serde_json::json;
//!
//! # async fn demo() {
//! let index = Index::from_resolvers([
//!     Resolver::builder("pi")
//!         .output(["pi"])
//!         .sync(|_, _| Ok(Entity::from_iter([("pi".to_string(), json!(3.14159))]))),
//!     Resolver::builder("tau")
//!         .input(["pi"])
//!         .output(["tau"])
//!         .sync(|_, input| {
//!             let pi = input["pi"].as_f64().unwrap_or_default();
//!             Ok(Entity::from_iter([("tau".to_string(), json!(pi * 2.0))]))
//!         }),
//! ]);
//! let out = Runner::new(index)
//!     .run(&Request::from_attrs(["tau"]), Entity::new())
//!     .await;
//! assert_eq!(out.result["tau"], json!(6.28318));
//! # }
//! ```

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod ast;
pub mod index;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Planning and execution
// ═══════════════════════════════════════════════════════════════
pub mod plan;
pub mod runtime;
pub mod stats;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod util;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{FixSuggestion, GraphError, Result};

// Config types
pub use config::{RuntimeSettings, Settings};

// AST types (Domain Model)
pub use ast::{
    Attr, AttrRequest, BatchOutput, Document, Entity, Mutation, MutationCall, Request,
    RequestItem, Resolve, ResolveContext, Resolver, ResolverId, Shape,
};

// Index
pub use index::{Alternative, Index};

// Planning
pub use plan::{plan, plan_with, ExecutionGraph, Node, NodeId, PlanCache, PlanOptions};

// Runtime types (Application Layer)
pub use runtime::{
    run, Extension, Extensions, PathChooser, PlannedOrder, PriorityChooser, RunConfig, RunOutput,
    Runner,
};

// Stats types
pub use stats::{classify, NodeRun, NodeStatus, Outcome, RunStats};
