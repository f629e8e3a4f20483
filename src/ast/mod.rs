//! AST Module - declarations the engine consumes
//!
//! Contains the static, per-registry and per-request types:
//! - `attr`: Attr, ResolverId (interned names)
//! - `shape`: Shape (nested attribute requirement tree)
//! - `request`: Request, AttrRequest, MutationCall
//! - `resolver`: Resolver, Mutation, Resolve/Mutate traits
//! - `document`: YAML registry documents for the CLI
//!
//! These types represent the "what". For planning and execution see the
//! `plan` and `runtime` modules.

mod attr;
mod document;
mod request;
mod resolver;
mod shape;

pub use attr::{Attr, ResolverId};
pub use document::{entity, Document, MutationSpec, ResolverSpec, SCHEMA_V01};
pub use request::{AttrRequest, MutationCall, Request, RequestItem};
pub use resolver::{
    is_unknown, unknown_value, BatchOutput, Entity, Mutate, Mutation, Resolve, ResolveContext,
    Resolver, ResolverBuilder, UNKNOWN_KEY,
};
pub use shape::{Shape, SET_KEY};
