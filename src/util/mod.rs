//! Utilities Module - shared infrastructure
//!
//! - `interner`: String interning for attribute and resolver names (Arc<str> deduplication)
//! - `fingerprint`: Stable xxh3 hashing for plan cache keys

mod fingerprint;
mod interner;

pub use fingerprint::{fingerprint, Fingerprinter};
pub use interner::{intern, Interner};
