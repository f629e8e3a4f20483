//! Batch barrier - one call per batch resolver across a collection's items
//!
//! Each element of an ordered collection runs its own sub-graph. When an
//! element reaches a batch-capable resolver it parks its input here instead
//! of calling the resolver. Once every element still running is parked (or
//! finished), the pending groups are flushed: one `resolve_batch` call per
//! resolver with the inputs in element order, results routed back by
//! position or by correlation key.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::ast::{Attr, BatchOutput, Entity, ResolveContext, Resolver, ResolverId};
use crate::error::{GraphError, Result};

/// Result of one parked input: output and the size of the call that served it
pub type BatchReply = (Result<Entity>, usize);

struct Pending {
    item: usize,
    input: Entity,
    reply: oneshot::Sender<BatchReply>,
}

struct Group {
    resolver: Arc<Resolver>,
    ctx: ResolveContext,
    pending: Vec<Pending>,
}

#[derive(Default)]
struct BarrierState {
    /// Elements whose sub-run has not finished
    active: usize,
    /// element → number of parked calls
    waiting: FxHashMap<usize, usize>,
    groups: BTreeMap<ResolverId, Group>,
}

impl BarrierState {
    fn ready(&self) -> bool {
        !self.groups.is_empty() && self.waiting.len() >= self.active
    }

    /// Take every pending group and clear the parked counts they held
    fn drain(&mut self) -> Vec<Group> {
        let groups: Vec<Group> = std::mem::take(&mut self.groups).into_values().collect();
        for group in &groups {
            for p in &group.pending {
                if let Some(count) = self.waiting.get_mut(&p.item) {
                    *count -= 1;
                    if *count == 0 {
                        self.waiting.remove(&p.item);
                    }
                }
            }
        }
        groups
    }
}

/// Barrier shared by the elements of one ordered collection
pub struct BatchBarrier {
    state: Mutex<BarrierState>,
}

impl BatchBarrier {
    pub fn new(items: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BarrierState {
                active: items,
                ..Default::default()
            }),
        })
    }

    /// Handle for element `item`; dropping it marks the element finished
    pub fn handle(self: &Arc<Self>, item: usize) -> BatchHandle {
        BatchHandle {
            barrier: Arc::clone(self),
            item,
        }
    }
}

/// One element's view of the barrier
pub struct BatchHandle {
    barrier: Arc<BatchBarrier>,
    item: usize,
}

impl BatchHandle {
    pub fn item(&self) -> usize {
        self.item
    }

    /// Park `input` for `resolver` and wait for the batch call's answer
    pub async fn call(&self, resolver: Arc<Resolver>, ctx: &ResolveContext, input: Entity) -> BatchReply {
        let (tx, rx) = oneshot::channel();
        let flush = {
            let mut state = self.barrier.state.lock();
            let group = state
                .groups
                .entry(resolver.id.clone())
                .or_insert_with(|| Group {
                    resolver: Arc::clone(&resolver),
                    ctx: ctx.clone(),
                    pending: Vec::new(),
                });
            group.pending.push(Pending {
                item: self.item,
                input,
                reply: tx,
            });
            *state.waiting.entry(self.item).or_default() += 1;
            if state.ready() {
                state.drain()
            } else {
                Vec::new()
            }
        };

        for group in flush {
            execute(group).await;
        }

        rx.await.unwrap_or_else(|_| {
            (
                Err(GraphError::resolver(
                    resolver.id.as_str(),
                    "batch call abandoned before answering",
                )),
                0,
            )
        })
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        let flush = {
            let mut state = self.barrier.state.lock();
            state.active = state.active.saturating_sub(1);
            if state.ready() {
                state.drain()
            } else {
                Vec::new()
            }
        };
        if flush.is_empty() {
            return;
        }
        // Cannot await in drop: hand the flush to the runtime
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for group in flush {
                        execute(group).await;
                    }
                });
            }
            Err(_) => debug!("no runtime to flush batch groups; parked calls abandoned"),
        }
    }
}

/// Run one batch call and route the results
async fn execute(group: Group) {
    let Group {
        resolver,
        mut ctx,
        mut pending,
    } = group;
    pending.sort_by_key(|p| p.item);
    let size = pending.len();
    let (inputs, replies): (Vec<Entity>, Vec<(Entity, oneshot::Sender<BatchReply>)>) = pending
        .into_iter()
        .map(|p| (p.input.clone(), (p.input, p.reply)))
        .unzip();
    ctx.path = batch_path(&ctx.path);

    debug!(resolver = %resolver.id, size, "batch flush");
    let outcome = resolver.invoker().resolve_batch(&ctx, inputs).await;
    let results = reconcile(&resolver.id, &replies, outcome);

    for ((_, reply), result) in replies.into_iter().zip(results) {
        // Receiver gone means the element was abandoned
        let _ = reply.send((result, size));
    }
}

fn batch_path(path: &str) -> String {
    match path.rfind('[') {
        Some(at) if path.ends_with(']') => path[..at].to_string(),
        _ => path.to_string(),
    }
}

/// Map a batch call's output back onto its inputs, in input order
fn reconcile<T>(
    resolver: &ResolverId,
    inputs: &[(Entity, T)],
    outcome: Result<BatchOutput>,
) -> Vec<Result<Entity>> {
    let expected = inputs.len();
    match outcome {
        Err(e) => vec![Err(e); expected],
        Ok(BatchOutput::Positional(outputs)) => {
            if outputs.len() != expected {
                let err = GraphError::BatchMismatch {
                    resolver: resolver.to_string(),
                    expected,
                    actual: outputs.len(),
                };
                return vec![Err(err); expected];
            }
            outputs.into_iter().map(Ok).collect()
        }
        Ok(BatchOutput::Keyed { key, items }) => correlate(resolver, &key, inputs, items),
    }
}

fn correlate<T>(
    resolver: &ResolverId,
    key: &Attr,
    inputs: &[(Entity, T)],
    outputs: Vec<Entity>,
) -> Vec<Result<Entity>> {
    let error = |reason: String| GraphError::BatchCorrelation {
        resolver: resolver.to_string(),
        key: key.to_string(),
        reason,
    };

    let mut by_key: FxHashMap<String, Entity> = FxHashMap::default();
    let mut duplicates: Vec<String> = Vec::new();
    for output in outputs {
        match output.get(key.as_str()).map(Value::to_string) {
            Some(k) => {
                if by_key.insert(k.clone(), output).is_some() {
                    duplicates.push(k);
                }
            }
            None => debug!(resolver = %resolver, key = %key, "keyed output without key dropped"),
        }
    }

    inputs
        .iter()
        .map(|(input, _)| {
            let Some(k) = input.get(key.as_str()).map(Value::to_string) else {
                return Err(error("input has no correlation key".to_string()));
            };
            if duplicates.contains(&k) {
                return Err(error(format!("several outputs carry {}", k)));
            }
            by_key
                .get(&k)
                .cloned()
                .ok_or_else(|| error(format!("no output for {}", k)))
        })
        .collect()
}
