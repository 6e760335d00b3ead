//! Transaction Boundary
//!
//! The store does not know how an atom's value is derived. That job belongs
//! to an external computation step, reached through the traits in this
//! module:
//!
//! - [`Computation`] is the factory the store holds for its lifetime. Each
//!   dispatch hands it the events, a read-only view of the authoritative
//!   cache, and the seed snapshot, and receives a [`Transaction`] back.
//! - [`Transaction`] is the working context for one dispatch: `process`
//!   computes or refreshes one atom's entry in the transient [`Patch`]
//!   (recursively processing dependencies as needed), and `finish` drains
//!   the deferred effects accumulated along the way.
//!
//! The computation step never sees the store itself, only [`CacheView`],
//! so it structurally cannot mutate graph state mid-dispatch. All mutation
//! flows back through the patch, which the store merges after processing
//! completes.
//!
//! A [`TransactionResult`] is produced once per dispatch, success or
//! failure, and broadcast to every transaction listener, then dropped. On
//! failure the patch it carries was never committed.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::StoreError;
use crate::graph::{AtomArena, AtomId, CacheRecord};
use crate::store::effect::Effect;
use crate::store::event::{Event, Snapshot};

/// Read-only view of the authoritative cache, handed to the computation
/// step for the duration of one dispatch.
#[derive(Clone, Copy)]
pub struct CacheView<'a> {
    arena: &'a AtomArena,
    cache: &'a IndexMap<AtomId, Arc<CacheRecord>>,
}

impl<'a> CacheView<'a> {
    pub(crate) fn new(
        arena: &'a AtomArena,
        cache: &'a IndexMap<AtomId, Arc<CacheRecord>>,
    ) -> Self {
        Self { arena, cache }
    }

    /// The committed record for an atom, if any. Never forces computation.
    pub fn record(&self, atom: AtomId) -> Option<&'a Arc<CacheRecord>> {
        self.cache.get(&atom)
    }

    /// The atom's diagnostic name, if the handle is live.
    pub fn name(&self, atom: AtomId) -> Option<&'a str> {
        self.arena.name(atom)
    }

    /// Whether the handle is live in this store.
    pub fn contains(&self, atom: AtomId) -> bool {
        self.arena.contains(atom)
    }
}

/// Everything the computation step may consult while processing.
#[derive(Clone, Copy)]
pub struct TransactionCtx<'a> {
    /// The events of this dispatch, in dispatch order.
    pub events: &'a [Event],
    /// Read-only view of the authoritative cache.
    pub cache: CacheView<'a>,
    /// The seed snapshot given at store construction.
    pub snapshot: &'a Snapshot,
}

/// Factory for per-dispatch computation contexts.
pub trait Computation: Send + Sync {
    /// Open the working context for one dispatch.
    fn begin<'tx>(&'tx self, ctx: TransactionCtx<'tx>) -> Box<dyn Transaction + 'tx>;
}

impl<C: Computation + ?Sized> Computation for Arc<C> {
    fn begin<'tx>(&'tx self, ctx: TransactionCtx<'tx>) -> Box<dyn Transaction + 'tx> {
        (**self).begin(ctx)
    }
}

/// The computation step's working context for one dispatch.
pub trait Transaction {
    /// Compute or refresh one atom's entry in the transient patch,
    /// recursively processing its dependencies as needed.
    ///
    /// An error aborts the whole dispatch; nothing from the patch is
    /// committed.
    fn process(&mut self, atom: AtomId, patch: &mut Patch) -> Result<(), StoreError>;

    /// Consume the context, yielding the deferred effects gathered during
    /// processing.
    fn finish(self: Box<Self>) -> Vec<Effect>;
}

/// Transient mapping from atom to freshly computed record, built up by the
/// computation step during one dispatch and merged on success.
///
/// Iteration order is insertion order; the store commits entries in that
/// order.
#[derive(Debug, Default)]
pub struct Patch {
    entries: IndexMap<AtomId, Arc<CacheRecord>>,
}

impl Patch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an atom's entry.
    pub fn insert(&mut self, atom: AtomId, record: Arc<CacheRecord>) {
        self.entries.insert(atom, record);
    }

    /// The entry for an atom, if it was processed this dispatch.
    pub fn get(&self, atom: AtomId) -> Option<&Arc<CacheRecord>> {
        self.entries.get(&atom)
    }

    /// Whether an atom was already processed this dispatch.
    pub fn contains(&self, atom: AtomId) -> bool {
        self.entries.contains_key(&atom)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (AtomId, &Arc<CacheRecord>)> {
        self.entries.iter().map(|(atom, record)| (*atom, record))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the patch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The outcome of one dispatch, broadcast to every transaction listener.
///
/// Ephemeral: the store builds it, broadcasts it, and lets it go. When
/// `error` is set, `patch` holds whatever the computation step produced
/// before failing; none of it was committed.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    /// The events of the dispatch, in dispatch order.
    pub events: Arc<[Event]>,
    /// The captured computation error, if the dispatch failed.
    pub error: Option<StoreError>,
    /// The transient patch the computation step produced.
    pub patch: Arc<Patch>,
}

impl TransactionResult {
    /// Whether the dispatch committed.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TypeSet;
    use serde_json::json;

    #[test]
    fn patch_replaces_entries_in_place() {
        let atom = AtomId::new();
        let types: TypeSet = Arc::new(indexmap::IndexSet::new());
        let first = CacheRecord::leaf(atom, Arc::new(json!(1)), types.clone());
        let second = CacheRecord::leaf(atom, Arc::new(json!(2)), types);

        let mut patch = Patch::new();
        patch.insert(atom, first);
        patch.insert(atom, second.clone());

        assert_eq!(patch.len(), 1);
        assert!(Arc::ptr_eq(patch.get(atom).unwrap(), &second));
    }

    #[test]
    fn patch_iterates_in_insertion_order() {
        let types: TypeSet = Arc::new(indexmap::IndexSet::new());
        let a = AtomId::new();
        let b = AtomId::new();

        let mut patch = Patch::new();
        patch.insert(b, CacheRecord::leaf(b, Arc::new(json!(0)), types.clone()));
        patch.insert(a, CacheRecord::leaf(a, Arc::new(json!(0)), types));

        let order: Vec<AtomId> = patch.iter().map(|(atom, _)| atom).collect();
        assert_eq!(order, vec![b, a]);
    }
}
