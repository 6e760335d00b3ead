//! Reverse Index
//!
//! The reverse index answers the dispatch loop's central question: given an
//! event type, which atoms must be asked to recompute? It maps each observed
//! event type to the set of *root* atoms reacting to it.
//!
//! A root atom is registered under its own direct `types` and, recursively,
//! under every transitive dependency's `types`. The registered atom is
//! always the root, not the dependency: recomputing the root pulls its
//! dependency chain along, so indexing the root is what keeps a derived
//! value live when only the derived value has subscribers.
//!
//! Registration happens only for atoms with at least one active listener
//! (the store enforces this); unobserved atoms stay out of the index and are
//! recomputed lazily on read instead.
//!
//! # Traversal
//!
//! Both maintenance operations walk the dependency tree with an explicit
//! stack and a visited set. The visited set keeps diamond-shaped graphs
//! linear, and turns a (contractually illegal) cyclic record chain into a
//! terminating walk instead of an infinite loop. Buckets are sets, so
//! re-registering an atom is a no-op.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::atom::AtomId;
use super::cache::CacheRecord;

/// Event type → atoms-to-recompute mapping, maintained incrementally.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    buckets: IndexMap<String, IndexSet<AtomId>>,
}

impl ReverseIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `root` under every event type found in `record` and its
    /// transitive dependencies.
    pub fn add(&mut self, root: AtomId, record: &Arc<CacheRecord>) {
        self.walk(record, |buckets, ty| {
            buckets.entry(ty.to_string()).or_default().insert(root);
        });
    }

    /// Remove `root` from every bucket the symmetric [`add`](Self::add)
    /// would have touched. Empty buckets are dropped.
    pub fn remove(&mut self, root: AtomId, record: &Arc<CacheRecord>) {
        self.walk(record, |buckets, ty| {
            if let Some(bucket) = buckets.get_mut(ty) {
                bucket.shift_remove(&root);
                if bucket.is_empty() {
                    buckets.shift_remove(ty);
                }
            }
        });
    }

    fn walk(
        &mut self,
        record: &Arc<CacheRecord>,
        mut apply: impl FnMut(&mut IndexMap<String, IndexSet<AtomId>>, &str),
    ) {
        let mut stack: Vec<Arc<CacheRecord>> = vec![record.clone()];
        let mut visited: IndexSet<AtomId> = IndexSet::new();

        while let Some(entry) = stack.pop() {
            if !visited.insert(entry.atom) {
                continue;
            }
            for ty in entry.types.iter() {
                apply(&mut self.buckets, ty);
            }
            stack.extend(entry.deps.iter().cloned());
        }
    }

    /// The atoms registered for an event type, in registration order.
    pub fn lookup(&self, event_type: &str) -> Option<&IndexSet<AtomId>> {
        self.buckets.get(event_type)
    }

    /// Whether `atom` is registered under `event_type`.
    pub fn contains(&self, event_type: &str, atom: AtomId) -> bool {
        self.buckets
            .get(event_type)
            .is_some_and(|bucket| bucket.contains(&atom))
    }

    /// Number of event types with at least one registered atom.
    pub fn type_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::cache::{Deps, TypeSet};
    use serde_json::json;

    fn types(list: &[&str]) -> TypeSet {
        Arc::new(list.iter().map(|t| t.to_string()).collect())
    }

    fn leaf(list: &[&str]) -> Arc<CacheRecord> {
        CacheRecord::leaf(AtomId::new(), Arc::new(json!(0)), types(list))
    }

    #[test]
    fn add_registers_direct_types() {
        let mut index = ReverseIndex::new();
        let record = leaf(&["inc", "dec"]);

        index.add(record.atom, &record);

        assert!(index.contains("inc", record.atom));
        assert!(index.contains("dec", record.atom));
        assert!(!index.contains("reset", record.atom));
    }

    #[test]
    fn add_registers_root_under_dependency_types() {
        let mut index = ReverseIndex::new();
        let dep = leaf(&["inc"]);
        let root = CacheRecord::with_deps(
            AtomId::new(),
            Arc::new(json!(0)),
            Deps::from_vec(vec![dep.clone()]),
            types(&[]),
        );

        index.add(root.atom, &root);

        // The root is registered under its dependency's type; the dependency
        // itself is not.
        assert!(index.contains("inc", root.atom));
        assert!(!index.contains("inc", dep.atom));
    }

    #[test]
    fn remove_is_symmetric_and_drops_empty_buckets() {
        let mut index = ReverseIndex::new();
        let dep = leaf(&["inc"]);
        let root = CacheRecord::with_deps(
            AtomId::new(),
            Arc::new(json!(0)),
            Deps::from_vec(vec![dep]),
            types(&["reset"]),
        );

        index.add(root.atom, &root);
        assert_eq!(index.type_count(), 2);

        index.remove(root.atom, &root);
        assert!(!index.contains("inc", root.atom));
        assert!(!index.contains("reset", root.atom));
        assert_eq!(index.type_count(), 0);
    }

    #[test]
    fn double_add_is_idempotent() {
        let mut index = ReverseIndex::new();
        let record = leaf(&["inc"]);

        index.add(record.atom, &record);
        index.add(record.atom, &record);

        assert_eq!(index.lookup("inc").map(|b| b.len()), Some(1));

        index.remove(record.atom, &record);
        assert!(index.lookup("inc").is_none());
    }

    #[test]
    fn diamond_dependencies_visit_once() {
        let mut index = ReverseIndex::new();
        let shared = leaf(&["tick"]);
        let left = CacheRecord::with_deps(
            AtomId::new(),
            Arc::new(json!(0)),
            Deps::from_vec(vec![shared.clone()]),
            types(&[]),
        );
        let right = CacheRecord::with_deps(
            AtomId::new(),
            Arc::new(json!(0)),
            Deps::from_vec(vec![shared]),
            types(&[]),
        );
        let root = CacheRecord::with_deps(
            AtomId::new(),
            Arc::new(json!(0)),
            Deps::from_vec(vec![left, right]),
            types(&[]),
        );

        index.add(root.atom, &root);
        assert!(index.contains("tick", root.atom));

        index.remove(root.atom, &root);
        assert_eq!(index.type_count(), 0);
    }

    #[test]
    fn buckets_keep_registration_order() {
        let mut index = ReverseIndex::new();
        let first = leaf(&["inc"]);
        let second = leaf(&["inc"]);

        index.add(first.atom, &first);
        index.add(second.atom, &second);

        let bucket: Vec<AtomId> = index.lookup("inc").unwrap().iter().copied().collect();
        assert_eq!(bucket, vec![first.atom, second.atom]);
    }
}
