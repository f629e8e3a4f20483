//! PlanCache - execution graphs keyed by request and known-data fingerprints
//!
//! Nested sub-runs plan the same join query for every element of a
//! collection; elements with the same data shape share one graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::ast::{Request, Shape};
use crate::index::Index;
use crate::util::Fingerprinter;

use super::graph::ExecutionGraph;
use super::planner::{plan_with, PlanOptions};

/// Thread-safe plan cache (lock-free reads)
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<u64, Arc<ExecutionGraph>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a planning problem
    pub fn key(index: &Index, request: &Request, known: &Shape, options: &PlanOptions) -> u64 {
        let mut fp = Fingerprinter::new();
        fp.u64(index.version())
            .u64(options.max_nested_depth as u64);
        request.fingerprint_into(&mut fp);
        known.fingerprint_into(&mut fp);
        fp.finish()
    }

    /// Cached graph, planning on a miss
    pub fn get_or_plan(
        &self,
        index: &Index,
        request: &Request,
        known: &Shape,
        options: &PlanOptions,
    ) -> Arc<ExecutionGraph> {
        let key = Self::key(index, request, known, options);
        if let Some(graph) = self.plans.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(graph.value());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let graph = Arc::new(plan_with(index, request, known, options));
        Arc::clone(self.plans.entry(key).or_insert(graph).value())
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn clear(&self) {
        self.plans.clear();
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
