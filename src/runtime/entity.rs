//! EntityStore - per-run attribute storage with DashMap
//!
//! Write-back policy:
//! - absent attribute: inserted
//! - object onto object: deep-merged, existing keys kept
//! - anything else already present: first writer wins
//!
//! Re-applying a value is a no-op and nothing is ever removed.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::ast::{is_unknown, Entity, Shape};

/// Thread-safe entity tree for one run (cheap to clone)
#[derive(Clone, Default)]
pub struct EntityStore {
    attrs: Arc<DashMap<String, Value>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with initial data
    pub fn from_entity(entity: Entity) -> Self {
        let store = Self::new();
        for (attr, value) in entity {
            store.attrs.insert(attr, value);
        }
        store
    }

    pub fn get(&self, attr: &str) -> Option<Value> {
        self.attrs.get(attr).map(|v| v.value().clone())
    }

    /// Present with a real value (not the "not produced" sentinel)
    pub fn contains(&self, attr: &str) -> bool {
        self.attrs.get(attr).is_some_and(|v| !is_unknown(v.value()))
    }

    /// Merge `output` into the tree, returning the attributes that changed
    pub fn merge(&self, output: Entity) -> Vec<String> {
        let mut written = Vec::new();
        for (attr, value) in output {
            if is_unknown(&value) {
                continue;
            }
            let changed = match self.attrs.entry(attr.clone()) {
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(value);
                    true
                }
                dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                    merge_value(slot.get_mut(), value)
                }
            };
            if changed {
                written.push(attr);
            }
        }
        written
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Entity {
        self.attrs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Copy of the declared part of the tree
    pub fn project(&self, shape: &Shape) -> Entity {
        let mut picked = Entity::new();
        for attr in shape.attrs() {
            if let Some(value) = self.get(attr.as_str()) {
                picked.insert(attr.to_string(), value);
            }
        }
        shape.project(&picked)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// Deep-merge `incoming` into `existing`; returns whether anything changed
pub fn merge_value(existing: &mut Value, incoming: Value) -> bool {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(incoming)) => {
            let mut changed = false;
            for (key, value) in incoming {
                match current.get_mut(&key) {
                    Some(slot) => changed |= merge_value(slot, value),
                    None => {
                        current.insert(key, value);
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("len", &self.len())
            .finish()
    }
}
