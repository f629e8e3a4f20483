//! Attribute Index - attribute → alternatives knowledge base
//!
//! Built from the resolver registry with a pure builder: [`Index::register`]
//! returns a new index and never touches the receiver. Clones share storage
//! through `Arc`, so an index is cheap to hand to concurrent runs.
//!
//! Every attribute maps to a list of [`Alternative`]s, one per distinct input
//! requirement shape. Ordering is deterministic regardless of registration
//! order: resolvers sort by priority (desc) then id, alternatives by their
//! best resolver.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ast::{Attr, Mutation, Resolver, ResolverId, Shape};

/// One way of producing an attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    /// Required input shape shared by the resolvers below
    pub input: Shape,
    /// Resolvers, priority desc then id
    pub resolvers: Vec<ResolverId>,
}

#[derive(Clone, Default)]
struct IndexInner {
    resolvers: FxHashMap<ResolverId, Arc<Resolver>>,
    mutations: FxHashMap<ResolverId, Arc<Mutation>>,
    attrs: FxHashMap<Attr, Vec<Alternative>>,
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Immutable attribute index
#[derive(Clone)]
pub struct Index {
    /// Unique per constructed index; keys plan caches
    version: u64,
    inner: Arc<IndexInner>,
}

impl Default for Index {
    fn default() -> Self {
        Self::wrap(IndexInner::default())
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrap(inner: IndexInner) -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(inner),
        }
    }

    /// Identity of this index value (clones share it)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Build an index from a set of resolvers
    pub fn from_resolvers<I>(resolvers: I) -> Self
    where
        I: IntoIterator<Item = Resolver>,
    {
        resolvers
            .into_iter()
            .fold(Self::new(), |index, resolver| index.register(resolver))
    }

    /// Return a new index that also knows `resolver`
    ///
    /// Registering an id again replaces its previous entries in the returned
    /// index only.
    pub fn register(&self, resolver: Resolver) -> Index {
        let mut inner = (*self.inner).clone();
        let resolver = Arc::new(resolver);

        if inner.resolvers.contains_key(&resolver.id) {
            inner.forget(&resolver.id);
        }
        inner.resolvers.insert(resolver.id.clone(), Arc::clone(&resolver));

        for attr in resolver.provides() {
            let alternatives = inner.attrs.entry(attr.clone()).or_default();
            match alternatives.iter_mut().find(|a| a.input == resolver.input) {
                Some(alt) => alt.resolvers.push(resolver.id.clone()),
                None => alternatives.push(Alternative {
                    input: resolver.input.clone(),
                    resolvers: vec![resolver.id.clone()],
                }),
            }
        }
        inner.sort_attrs(resolver.provides());

        Self::wrap(inner)
    }

    /// Return a new index that also knows `mutation`
    pub fn register_mutation(&self, mutation: Mutation) -> Index {
        let mut inner = (*self.inner).clone();
        inner
            .mutations
            .insert(mutation.id.clone(), Arc::new(mutation));
        Self::wrap(inner)
    }

    /// Union of two indexes; `other` wins on duplicate ids
    pub fn merge(&self, other: &Index) -> Index {
        let mut ids: Vec<&ResolverId> = other.inner.resolvers.keys().collect();
        ids.sort();
        let merged = ids.into_iter().fold(self.clone(), |index, id| {
            index.register((*other.inner.resolvers[id]).clone())
        });
        let mut inner = (*merged.inner).clone();
        for (id, mutation) in &other.inner.mutations {
            inner.mutations.insert(id.clone(), Arc::clone(mutation));
        }
        Self::wrap(inner)
    }

    /// Alternatives producing `attr` (empty when none)
    pub fn lookup(&self, attr: &str) -> &[Alternative] {
        static EMPTY: &[Alternative] = &[];
        self.inner.attrs.get(attr).map_or(EMPTY, Vec::as_slice)
    }

    /// Every resolver producing `attr`, priority desc then id
    pub fn candidates(&self, attr: &str) -> Vec<Arc<Resolver>> {
        let mut out: Vec<Arc<Resolver>> = self
            .lookup(attr)
            .iter()
            .flat_map(|alt| alt.resolvers.iter())
            .filter_map(|id| self.inner.resolvers.get(id).cloned())
            .collect();
        out.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        out
    }

    pub fn resolver(&self, id: &str) -> Option<&Arc<Resolver>> {
        self.inner.resolvers.get(id)
    }

    pub fn mutation(&self, id: &str) -> Option<&Arc<Mutation>> {
        self.inner.mutations.get(id)
    }

    /// Every attribute with at least one producer, sorted
    pub fn attributes(&self) -> Vec<&Attr> {
        let mut attrs: Vec<&Attr> = self
            .inner
            .attrs
            .iter()
            .filter(|(_, alts)| !alts.is_empty())
            .map(|(attr, _)| attr)
            .collect();
        attrs.sort();
        attrs
    }

    pub fn resolver_count(&self) -> usize {
        self.inner.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.resolvers.is_empty() && self.inner.mutations.is_empty()
    }
}

fn sort_key(resolver: &Resolver) -> (Reverse<i64>, &ResolverId) {
    (Reverse(resolver.priority), &resolver.id)
}

impl IndexInner {
    /// Drop every entry of `id`, removing emptied alternatives
    fn forget(&mut self, id: &ResolverId) {
        let Some(old) = self.resolvers.remove(id) else {
            return;
        };
        for attr in old.provides() {
            if let Some(alternatives) = self.attrs.get_mut(attr) {
                for alt in alternatives.iter_mut() {
                    alt.resolvers.retain(|r| r != id);
                }
                alternatives.retain(|alt| !alt.resolvers.is_empty());
                if alternatives.is_empty() {
                    self.attrs.remove(attr);
                }
            }
        }
    }

    fn sort_attrs<'a>(&mut self, attrs: impl Iterator<Item = &'a Attr>) {
        for attr in attrs {
            let Some(alternatives) = self.attrs.get_mut(attr) else {
                continue;
            };
            let resolvers = &self.resolvers;
            let key = |id: &ResolverId| {
                (
                    Reverse(resolvers.get(id).map_or(0, |r| r.priority)),
                    id.clone(),
                )
            };
            for alt in alternatives.iter_mut() {
                alt.resolvers.sort_by_key(|id| key(id));
            }
            alternatives.sort_by(|a, b| {
                let best = |alt: &Alternative| alt.resolvers.first().map(|id| key(id));
                best(a).cmp(&best(b)).then_with(|| a.input.cmp(&b.input))
            });
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&ResolverId> = self.inner.resolvers.keys().collect();
        ids.sort();
        f.debug_struct("Index")
            .field("resolvers", &ids)
            .field("attributes", &self.attributes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Entity;

    fn resolver(id: &str, input: &[&str], output: &[&str], priority: i64) -> Resolver {
        Resolver::builder(id)
            .input(input.iter().copied())
            .output(output.iter().copied())
            .priority(priority)
            .sync(|_, _| Ok(Entity::new()))
    }

    #[test]
    fn register_does_not_touch_previous_index() {
        let empty = Index::new();
        let one = empty.register(resolver("pi", &[], &["pi"], 0));
        assert!(empty.lookup("pi").is_empty());
        assert_eq!(one.lookup("pi").len(), 1);
    }

    #[test]
    fn alternatives_group_by_input_shape() {
        let index = Index::from_resolvers([
            resolver("a", &["x"], &["out"], 0),
            resolver("b", &["x"], &["out"], 5),
            resolver("c", &["y"], &["out"], 1),
        ]);
        let alts = index.lookup("out");
        assert_eq!(alts.len(), 2);
        // b (priority 5) leads the x alternative, which outranks c's
        assert_eq!(alts[0].resolvers, vec![ResolverId::new("b"), ResolverId::new("a")]);
        assert_eq!(alts[1].resolvers, vec![ResolverId::new("c")]);
    }

    #[test]
    fn registration_order_does_not_matter() {
        let rs = || {
            vec![
                resolver("a", &["x"], &["out"], 0),
                resolver("b", &[], &["out"], 0),
                resolver("c", &["y"], &["out", "side"], 2),
            ]
        };
        let forward = Index::from_resolvers(rs());
        let backward = Index::from_resolvers(rs().into_iter().rev());
        assert_eq!(forward.lookup("out"), backward.lookup("out"));
        let ids = |index: &Index| -> Vec<String> {
            index
                .candidates("out")
                .iter()
                .map(|r| r.id.to_string())
                .collect()
        };
        assert_eq!(ids(&forward), vec!["c", "a", "b"]);
        assert_eq!(ids(&forward), ids(&backward));
    }

    #[test]
    fn reregister_replaces_old_entries() {
        let v1 = Index::new().register(resolver("r", &["x"], &["old"], 0));
        let v2 = v1.register(resolver("r", &[], &["new"], 0));
        assert!(v2.lookup("old").is_empty());
        assert_eq!(v2.lookup("new").len(), 1);
        assert_eq!(v1.lookup("old").len(), 1);
        assert_eq!(v2.resolver_count(), 1);
    }

    #[test]
    fn merge_combines_registries() {
        let left = Index::from_resolvers([resolver("a", &[], &["a"], 0)]);
        let right = Index::from_resolvers([resolver("b", &[], &["b"], 0)]);
        let merged = left.merge(&right);
        let attrs: Vec<&str> = merged.attributes().into_iter().map(Attr::as_str).collect();
        assert_eq!(attrs, vec!["a", "b"]);
    }

    #[test]
    fn unknown_attribute_has_no_alternatives() {
        let index = Index::from_resolvers([resolver("a", &[], &["a"], 0)]);
        assert!(index.lookup("nope").is_empty());
        assert!(index.candidates("nope").is_empty());
    }
}
