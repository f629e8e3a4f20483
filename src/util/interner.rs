//! Name interning - one `Arc<str>` per distinct attribute or resolver name
//!
//! Planning clones names constantly (graph indexes, node `produces` sets,
//! stats records), so names share one allocation.

use std::sync::{Arc, LazyLock};

use dashmap::DashSet;

static NAMES: LazyLock<Interner> = LazyLock::new(Interner::default);

/// Concurrent set of interned names
#[derive(Default)]
pub struct Interner {
    names: DashSet<Arc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for `name`, inserting it on first sight
    pub fn intern(&self, name: &str) -> Arc<str> {
        if let Some(known) = self.names.get(name) {
            return Arc::clone(known.key());
        }
        let fresh: Arc<str> = Arc::from(name);
        // A concurrent first insert may have won; hand out the stored copy
        if !self.names.insert(Arc::clone(&fresh)) {
            if let Some(known) = self.names.get(name) {
                return Arc::clone(known.key());
            }
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Intern through the process-wide table
#[inline]
pub fn intern(name: &str) -> Arc<str> {
    NAMES.intern(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_shares_allocation() {
        let names = Interner::new();
        let a = names.intern("user/name");
        let b = names.intern("user/name");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn distinct_names_are_distinct() {
        let names = Interner::new();
        let a = names.intern("user/name");
        let b = names.intern("user/email");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(&*b, "user/email");
    }

    #[test]
    fn global_table_is_shared() {
        assert!(Arc::ptr_eq(&intern("global/attr"), &intern("global/attr")));
    }

    #[test]
    fn racing_threads_get_one_copy() {
        let names = Arc::new(Interner::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let names = Arc::clone(&names);
                std::thread::spawn(move || names.intern("shared/attr"))
            })
            .collect();
        let results: Vec<Arc<str>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(names.len(), 1);
    }
}
