//! Atom Handles
//!
//! An atom is a reactive cell. Its identity is an opaque, stable handle;
//! the value lives elsewhere (in the store's cache side table), never inside
//! the handle itself. Handles are compared by identity, so two atoms with
//! the same diagnostic name are still distinct cells.
//!
//! # Lifetime
//!
//! Atom lifetime is explicit: an atom is registered in an [`AtomArena`]
//! when created and must be freed when it is no longer needed. Freeing a handle removes its
//! registration, and the store removes the matching cache entry, listeners,
//! and index entries. A freed (or foreign) handle fails the arena lookup
//! instead of silently resurrecting state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for an atom.
///
/// Drawn from a process-wide counter, so handles from different stores never
/// collide; a handle presented to the wrong store simply fails its arena
/// lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom#{}", self.0)
    }
}

/// Registry of live atoms.
///
/// Maps each live handle to its diagnostic name. The name is used only for
/// event naming and snapshots; reactivity is keyed entirely by the handle.
#[derive(Debug, Default)]
pub struct AtomArena {
    atoms: IndexMap<AtomId, Arc<str>>,
}

impl AtomArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new atom under the given diagnostic name.
    pub fn create(&mut self, name: &str) -> AtomId {
        let id = AtomId::new();
        self.atoms.insert(id, Arc::from(name));
        id
    }

    /// Remove an atom's registration.
    ///
    /// Returns `false` if the handle was already freed or never belonged to
    /// this arena.
    pub fn remove(&mut self, atom: AtomId) -> bool {
        self.atoms.shift_remove(&atom).is_some()
    }

    /// Check whether a handle is live in this arena.
    pub fn contains(&self, atom: AtomId) -> bool {
        self.atoms.contains_key(&atom)
    }

    /// Get an atom's diagnostic name.
    pub fn name(&self, atom: AtomId) -> Option<&str> {
        self.atoms.get(&atom).map(|name| name.as_ref())
    }

    /// Get an atom's diagnostic name as a shared string.
    pub fn name_arc(&self, atom: AtomId) -> Option<Arc<str>> {
        self.atoms.get(&atom).cloned()
    }

    /// Number of live atoms.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether the arena holds no live atoms.
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_ids_are_unique() {
        let id1 = AtomId::new();
        let id2 = AtomId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn create_and_lookup() {
        let mut arena = AtomArena::new();
        let atom = arena.create("counter");

        assert!(arena.contains(atom));
        assert_eq!(arena.name(atom), Some("counter"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn freed_handle_is_not_live() {
        let mut arena = AtomArena::new();
        let atom = arena.create("temp");

        assert!(arena.remove(atom));
        assert!(!arena.contains(atom));
        assert_eq!(arena.name(atom), None);

        // Double free reports failure instead of panicking.
        assert!(!arena.remove(atom));
    }

    #[test]
    fn foreign_handle_fails_lookup() {
        let arena = AtomArena::new();
        let foreign = AtomId::new();

        assert!(!arena.contains(foreign));
        assert_eq!(arena.name(foreign), None);
    }

    #[test]
    fn same_name_distinct_identity() {
        let mut arena = AtomArena::new();
        let a = arena.create("x");
        let b = arena.create("x");

        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
    }
}
