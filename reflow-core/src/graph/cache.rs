//! Cache Records
//!
//! A [`CacheRecord`] is the immutable snapshot of one atom's computed state
//! plus the metadata needed to re-derive its reactivity:
//!
//! - `state`: the computed value
//! - `deps`: the records of the dependencies it read during its last
//!   computation, in read order
//! - `types`: the event types it reacts to *directly* (its dependencies
//!   contribute their own types through the `deps` chain)
//!
//! Records are replaced, never mutated: each recomputation produces a fresh
//! record and the store swaps it in. That makes two identity checks cheap
//! and reliable:
//!
//! - "did the value change?" is `Arc::ptr_eq` on `state`; a computation
//!   that wants to signal "unchanged" hands back the same `Arc`.
//! - "did the reactivity shape change?" is `Arc::ptr_eq` on `types` plus
//!   [`is_types_change`] over the `deps` lists.
//!
//! Deep equality is deliberately never consulted.
//!
//! # Invariants
//!
//! The graph formed by following `deps` must be acyclic. The store holds at
//! most one record per atom at any instant.

use std::sync::Arc;

use indexmap::IndexSet;
use serde_json::Value;
use smallvec::SmallVec;

use super::atom::AtomId;

/// Ordered direct-dependency records. Dependency lists are short in
/// practice, so small ones live inline.
pub type Deps = SmallVec<[Arc<CacheRecord>; 4]>;

/// The set of event types an atom reacts to directly.
///
/// Shared behind an `Arc` so an unchanged reactivity shape can be detected
/// by pointer identity across recomputations.
pub type TypeSet = Arc<IndexSet<String>>;

/// Immutable snapshot of one atom's computed state at one point in logical
/// time.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    /// The atom this record belongs to.
    pub atom: AtomId,
    /// The computed value. Compared by identity, never by structure.
    pub state: Arc<Value>,
    /// Records of the direct dependencies read during the last computation.
    pub deps: Deps,
    /// Event types this atom reacts to directly.
    pub types: TypeSet,
}

impl CacheRecord {
    /// Build a record for an atom with no dependencies.
    pub fn leaf(atom: AtomId, state: Arc<Value>, types: TypeSet) -> Arc<Self> {
        Arc::new(Self {
            atom,
            state,
            deps: Deps::new(),
            types,
        })
    }

    /// Build a record with dependencies.
    pub fn with_deps(atom: AtomId, state: Arc<Value>, deps: Deps, types: TypeSet) -> Arc<Self> {
        Arc::new(Self {
            atom,
            state,
            deps,
            types,
        })
    }

    /// Whether `other` holds the identical state value.
    pub fn same_state(&self, other: &CacheRecord) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Determine whether the reactivity *shape* of an atom changed between two
/// computations, given its previous and new dependency lists.
///
/// The shape changed when the number of dependencies differs at any depth,
/// or when any dependency's direct `types` set is a different reference.
/// Returns on the first mismatch; a `false` result guarantees the transitive
/// type registration derived from the old list is still valid for the new
/// one.
///
/// Implemented with an explicit stack rather than recursion, so arbitrarily
/// deep dependency chains cannot overflow the call stack.
pub fn is_types_change(deps_old: &[Arc<CacheRecord>], deps_new: &[Arc<CacheRecord>]) -> bool {
    if deps_old.len() != deps_new.len() {
        return true;
    }

    let mut stack: Vec<(Arc<CacheRecord>, Arc<CacheRecord>)> = deps_old
        .iter()
        .cloned()
        .zip(deps_new.iter().cloned())
        .collect();

    while let Some((old, new)) = stack.pop() {
        if !Arc::ptr_eq(&old.types, &new.types) {
            return true;
        }
        if old.deps.len() != new.deps.len() {
            return true;
        }
        stack.extend(old.deps.iter().cloned().zip(new.deps.iter().cloned()));
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(list: &[&str]) -> TypeSet {
        Arc::new(list.iter().map(|t| t.to_string()).collect())
    }

    fn value(v: Value) -> Arc<Value> {
        Arc::new(v)
    }

    #[test]
    fn same_state_is_identity_not_equality() {
        let atom = AtomId::new();
        let shared = value(json!(1));
        let a = CacheRecord::leaf(atom, shared.clone(), types(&[]));
        let b = CacheRecord::leaf(atom, shared, types(&[]));
        let c = CacheRecord::leaf(atom, value(json!(1)), types(&[]));

        assert!(a.same_state(&b));
        // Structurally equal but a different allocation: counts as changed.
        assert!(!a.same_state(&c));
    }

    #[test]
    fn no_change_for_identical_lists() {
        let dep = CacheRecord::leaf(AtomId::new(), value(json!(0)), types(&["inc"]));
        let old = [dep.clone()];
        let new = [dep];

        assert!(!is_types_change(&old, &new));
    }

    #[test]
    fn length_mismatch_is_a_change() {
        let dep = CacheRecord::leaf(AtomId::new(), value(json!(0)), types(&["inc"]));
        assert!(is_types_change(&[dep], &[]));
    }

    #[test]
    fn types_reference_mismatch_is_a_change() {
        let atom = AtomId::new();
        let state = value(json!(0));
        let old = CacheRecord::leaf(atom, state.clone(), types(&["inc"]));
        // Same contents, different allocation of the type set.
        let new = CacheRecord::leaf(atom, state, types(&["inc"]));

        assert!(is_types_change(&[old], &[new]));
    }

    #[test]
    fn shared_types_at_depth_is_not_a_change() {
        let leaf_types = types(&["inc"]);
        let mid_types = types(&[]);

        let leaf_old = CacheRecord::leaf(AtomId::new(), value(json!(0)), leaf_types.clone());
        let leaf_new = CacheRecord::leaf(leaf_old.atom, value(json!(1)), leaf_types);

        let mid_old = CacheRecord::with_deps(
            AtomId::new(),
            value(json!(0)),
            Deps::from_vec(vec![leaf_old]),
            mid_types.clone(),
        );
        let mid_new = CacheRecord::with_deps(
            mid_old.atom,
            value(json!(2)),
            Deps::from_vec(vec![leaf_new]),
            mid_types,
        );

        // State changed at every level, but the reactive shape did not.
        assert!(!is_types_change(&[mid_old], &[mid_new]));
    }

    #[test]
    fn deep_mismatch_is_found() {
        let mid_types = types(&[]);

        let leaf_old = CacheRecord::leaf(AtomId::new(), value(json!(0)), types(&["a"]));
        let leaf_new = CacheRecord::leaf(leaf_old.atom, value(json!(0)), types(&["b"]));

        let mid_old = CacheRecord::with_deps(
            AtomId::new(),
            value(json!(0)),
            Deps::from_vec(vec![leaf_old]),
            mid_types.clone(),
        );
        let mid_new = CacheRecord::with_deps(
            mid_old.atom,
            value(json!(0)),
            Deps::from_vec(vec![leaf_new]),
            mid_types,
        );

        assert!(is_types_change(&[mid_old], &[mid_new]));
    }
}
