//! Store Engine
//!
//! The store holds the authoritative cache (one record per atom), the
//! reverse index, and the listener registries, and orchestrates one dispatch
//! end to end:
//!
//! 1. Hand the events to the computation step and `process` every atom that
//!    is explicitly targeted or registered in the reverse index for one of
//!    the event types. Results accumulate in a transient patch.
//! 2. On success, merge the patch entry by entry into the cache, updating
//!    the reverse index incrementally and collecting the atoms whose value
//!    identity changed. On failure, discard the patch whole; no partial
//!    commit.
//! 3. Broadcast the transaction result to every transaction listener,
//!    success or failure.
//! 4. On failure, return the error. On success, notify the changed atoms'
//!    listeners synchronously, then schedule the deferred effects and return
//!    the completion barrier.
//!
//! # Laziness
//!
//! An atom participates in the reverse index only while it has at least one
//! active listener; its dependencies are covered by its own registration.
//! Unobserved atoms keep their last record in the cache but are not kept
//! current. Reading one through [`Store::state`] forces a one-shot
//! recomputation via a synthesized, uniquely named internal event.
//!
//! # Concurrency
//!
//! All graph mutation happens under one mutex, held for the synchronous part
//! of a dispatch and never across a listener call, an effect, or an await
//! point. Listeners and effects may therefore re-enter the store freely.
//! The only concurrency is temporal: deferred effects run as independent
//! tasks that may overlap with each other and with later dispatches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StoreError;
use crate::graph::{is_types_change, AtomArena, AtomId, CacheRecord, ReverseIndex};
use crate::store::effect::{Commit, Effect};
use crate::store::event::{Event, Snapshot};
use crate::store::listener::{call_safety, AtomListener, Subscriber, TransactionListener};
use crate::store::transaction::{
    CacheView, Computation, Patch, TransactionCtx, TransactionResult,
};

/// The reactive store.
///
/// Cheap to clone: clones share the same state, which is how deferred
/// effects receive a handle they can dispatch through.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    computation: Box<dyn Computation>,
    snapshot: Snapshot,
    event_seq: AtomicU64,
}

#[derive(Default)]
struct StoreState {
    arena: AtomArena,
    cache: IndexMap<AtomId, Arc<CacheRecord>>,
    listeners: IndexMap<AtomId, Vec<(u64, AtomListener)>>,
    transaction_listeners: Vec<(u64, TransactionListener)>,
    index: ReverseIndex,
    listener_seq: u64,
}

impl StoreState {
    fn next_listener_id(&mut self) -> u64 {
        let id = self.listener_seq;
        self.listener_seq += 1;
        id
    }

    /// Fold one computed record into the authoritative cache, keeping the
    /// reverse index consistent and recording a value-identity change.
    fn merge_patch(
        &mut self,
        atom: AtomId,
        record: Arc<CacheRecord>,
        changed: &mut Vec<Arc<CacheRecord>>,
    ) {
        let previous = self.cache.get(&atom).cloned();

        if self.listeners.contains_key(&atom) {
            match previous.as_ref() {
                None => self.index.add(atom, &record),
                Some(old) => {
                    if !Arc::ptr_eq(&old.types, &record.types)
                        || is_types_change(&old.deps, &record.deps)
                    {
                        self.index.remove(atom, old);
                        self.index.add(atom, &record);
                    }
                }
            }
        }

        let state_changed = previous
            .as_ref()
            .map_or(true, |old| !old.same_state(&record));
        self.cache.insert(atom, record.clone());
        if state_changed {
            changed.push(record);
        }
    }

    fn remove_atom_listener(&mut self, atom: AtomId, id: u64) {
        let Some(entry) = self.listeners.get_mut(&atom) else {
            return;
        };
        entry.retain(|(listener_id, _)| *listener_id != id);
        if entry.is_empty() {
            self.listeners.shift_remove(&atom);
            // Deactivation: the last computed value stays cached for
            // re-reads, but the atom no longer participates in dispatch.
            if let Some(record) = self.cache.get(&atom).cloned() {
                self.index.remove(atom, &record);
            }
        }
    }
}

impl Store {
    /// Create a store with an empty seed snapshot.
    pub fn new(computation: impl Computation + 'static) -> Self {
        Self::with_snapshot(computation, Snapshot::new())
    }

    /// Create a store seeded with a snapshot. The seed is consumed only by
    /// the computation step, on an atom's first computation.
    pub fn with_snapshot(computation: impl Computation + 'static, snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                computation: Box::new(computation),
                snapshot,
                event_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new atom under a diagnostic name.
    pub fn create_atom(&self, name: &str) -> AtomId {
        self.inner.state.lock().arena.create(name)
    }

    /// Free an atom: its registration, cache entry, listeners, and index
    /// entries are all removed. The handle is dead afterwards.
    pub fn free_atom(&self, atom: AtomId) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        if !state.arena.contains(atom) {
            return Err(StoreError::UnknownAtom(atom));
        }
        state.listeners.shift_remove(&atom);
        if let Some(record) = state.cache.shift_remove(&atom) {
            state.index.remove(atom, &record);
        }
        state.arena.remove(atom);
        Ok(())
    }

    /// Dispatch a single event.
    pub fn dispatch(&self, event: Event) -> Result<Commit, StoreError> {
        self.dispatch_batch(vec![event])
    }

    /// Dispatch an ordered batch of events as one atomic transaction.
    ///
    /// Returns the completion barrier for the deferred effects, or the
    /// captured error if computation failed, in which case nothing was
    /// committed and no effect runs.
    pub fn dispatch_batch(&self, events: Vec<Event>) -> Result<Commit, StoreError> {
        if events.is_empty() {
            return Err(StoreError::InvalidUsage("dispatch arguments".into()));
        }
        let events: Arc<[Event]> = events.into();

        let mut patch = Patch::new();
        let mut changed: Vec<Arc<CacheRecord>> = Vec::new();
        let mut error: Option<StoreError> = None;
        let effects: Vec<Effect>;

        let mut state = self.inner.state.lock();
        {
            let ctx = TransactionCtx {
                events: &events,
                cache: CacheView::new(&state.arena, &state.cache),
                snapshot: &self.inner.snapshot,
            };
            let mut tx = self.inner.computation.begin(ctx);

            let processed = (|| -> Result<(), StoreError> {
                for event in events.iter() {
                    for &target in &event.targets {
                        tx.process(target, &mut patch)?;
                    }
                }
                for event in events.iter() {
                    if let Some(bucket) = state.index.lookup(&event.event_type) {
                        for &atom in bucket {
                            tx.process(atom, &mut patch)?;
                        }
                    }
                }
                Ok(())
            })();
            if let Err(err) = processed {
                error = Some(err);
            }

            effects = tx.finish();
        }

        if error.is_none() {
            for (atom, record) in patch.iter() {
                let record = record.clone();
                state.merge_patch(atom, record, &mut changed);
            }
        }

        tracing::debug!(
            events = events.len(),
            patched = patch.len(),
            changed = changed.len(),
            failed = error.is_some(),
            "dispatch processed"
        );

        let transaction_listeners: Vec<TransactionListener> = state
            .transaction_listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        let mut notifications: Vec<(AtomListener, Arc<Value>)> = Vec::new();
        for record in &changed {
            if let Some(listeners) = state.listeners.get(&record.atom) {
                for (_, listener) in listeners {
                    notifications.push((listener.clone(), record.state.clone()));
                }
            }
        }
        drop(state);

        // Every transaction is observable, failed ones included.
        let result = TransactionResult {
            events: events.clone(),
            error: error.clone(),
            patch: Arc::new(patch),
        };
        for listener in &transaction_listeners {
            call_safety("transaction listener", || listener(&result));
        }

        if let Some(err) = error {
            return Err(err);
        }

        for (listener, value) in &notifications {
            call_safety("atom listener", || listener(value));
        }

        Ok(Commit::schedule(effects, self.clone()))
    }

    /// The current cache record for an atom. Never forces computation.
    pub fn cache(&self, atom: AtomId) -> Option<Arc<CacheRecord>> {
        self.inner.state.lock().cache.get(&atom).cloned()
    }

    /// Read one atom's current value, forcing computation when needed.
    ///
    /// A never-computed atom is initialized; a cached atom without active
    /// listeners may be stale and is recomputed. Both go through a
    /// synthesized, uniquely named event targeting only this atom, so the
    /// event can never collide with an application type in the reverse
    /// index.
    pub fn state(&self, atom: AtomId) -> Result<Arc<Value>, StoreError> {
        enum Forced {
            Init,
            Invalidate,
            Current,
        }

        let (name, forced) = {
            let state = self.inner.state.lock();
            let Some(name) = state.arena.name_arc(atom) else {
                return Err(StoreError::UnknownAtom(atom));
            };
            let forced = match state.cache.get(&atom) {
                None => Forced::Init,
                Some(_) if !state.listeners.contains_key(&atom) => Forced::Invalidate,
                Some(_) => Forced::Current,
            };
            (name, forced)
        };

        match forced {
            Forced::Init => {
                self.dispatch(self.internal_event("init", &name, atom))?;
            }
            Forced::Invalidate => {
                self.dispatch(self.internal_event("invalidate", &name, atom))?;
            }
            Forced::Current => {}
        }

        let state = self.inner.state.lock();
        state
            .cache
            .get(&atom)
            .map(|record| record.state.clone())
            .ok_or_else(|| StoreError::NotComputed(name.to_string()))
    }

    /// Collect the current state tree: every actively-listened atom and,
    /// recursively, everything reachable through its dependency chain.
    ///
    /// Pure read: actively-listened atoms are already current, so nothing
    /// is computed.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        let mut result = Snapshot::new();
        let mut visited: IndexSet<AtomId> = IndexSet::new();

        let roots: Vec<Arc<CacheRecord>> = state
            .listeners
            .keys()
            .filter_map(|atom| state.cache.get(atom).cloned())
            .collect();

        for root in roots {
            let mut stack = vec![root];
            while let Some(record) = stack.pop() {
                if !visited.insert(record.atom) {
                    continue;
                }
                if let Some(name) = state.arena.name(record.atom) {
                    result.insert(name, (*record.state).clone());
                }
                stack.extend(record.deps.iter().cloned());
            }
        }

        result
    }

    /// Register a subscriber. Returns the guard that removes it.
    ///
    /// Atom subscriptions perform one forced synchronous read (initializing
    /// or refreshing the atom as needed) and deliver one immediate initial
    /// notification unless that read itself changed the value (a change is
    /// already delivered through the dispatch path, and is never doubled).
    /// If the forced read fails the registration is rolled back and the
    /// error returned.
    pub fn subscribe(&self, subscriber: Subscriber) -> Result<Subscription, StoreError> {
        match subscriber {
            Subscriber::Transactions { listener } => {
                let mut state = self.inner.state.lock();
                let id = state.next_listener_id();
                state.transaction_listeners.push((id, listener));
                Ok(Subscription {
                    inner: Arc::downgrade(&self.inner),
                    kind: Some(SubscriptionKind::Transactions(id)),
                })
            }
            Subscriber::Atom { atom, listener } => self.subscribe_atom(atom, listener),
        }
    }

    fn subscribe_atom(
        &self,
        atom: AtomId,
        listener: AtomListener,
    ) -> Result<Subscription, StoreError> {
        let (name, id, previous, first) = {
            let mut state = self.inner.state.lock();
            let Some(name) = state.arena.name_arc(atom) else {
                return Err(StoreError::UnknownAtom(atom));
            };
            let id = state.next_listener_id();
            let previous = state.cache.get(&atom).cloned();
            let entry = state.listeners.entry(atom).or_insert_with(Vec::new);
            let first = entry.is_empty();
            entry.push((id, listener.clone()));
            (name, id, previous, first)
        };

        // Forced initial read. A never-computed atom is initialized; a
        // cached atom gaining its first listener was not kept current and is
        // invalidated so it re-enters the index with a fresh value.
        let forced = if previous.is_none() {
            Some(self.internal_event("init", &name, atom))
        } else if first {
            Some(self.internal_event("invalidate", &name, atom))
        } else {
            None
        };
        if let Some(event) = forced {
            if let Err(err) = self.dispatch(event) {
                self.rollback_atom_listener(atom, id);
                return Err(err);
            }
        }

        let current = {
            let mut state = self.inner.state.lock();
            match state.cache.get(&atom).cloned() {
                Some(record) => {
                    if first {
                        // Activation. Insertion is idempotent, so meeting
                        // the merge path's own registration is harmless.
                        state.index.add(atom, &record);
                    }
                    record
                }
                None => {
                    drop(state);
                    self.rollback_atom_listener(atom, id);
                    return Err(StoreError::NotComputed(name.to_string()));
                }
            }
        };

        if let Some(previous) = previous {
            if Arc::ptr_eq(&previous.state, &current.state) {
                call_safety("atom listener", || listener(&current.state));
            }
        }

        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            kind: Some(SubscriptionKind::Atom(atom, id)),
        })
    }

    fn rollback_atom_listener(&self, atom: AtomId, id: u64) {
        self.inner.state.lock().remove_atom_listener(atom, id);
    }

    fn internal_event(&self, kind: &str, name: &str, atom: AtomId) -> Event {
        let seq = self.inner.event_seq.fetch_add(1, Ordering::Relaxed);
        Event::new(format!("{kind} \"{name}\" ~{seq}"), Value::Null).with_target(atom)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Store")
            .field("atoms", &state.arena.len())
            .field("cached", &state.cache.len())
            .field("listened", &state.listeners.len())
            .finish()
    }
}

enum SubscriptionKind {
    Atom(AtomId, u64),
    Transactions(u64),
}

/// Guard for a registered subscriber.
///
/// Dropping it removes the callback; when it was the atom's last listener,
/// the atom is deactivated (its reverse-index entries are removed, its last
/// value stays cached).
pub struct Subscription {
    inner: Weak<StoreInner>,
    kind: Option<SubscriptionKind>,
}

impl Subscription {
    /// Remove the subscriber now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(kind) = self.kind.take() else {
            return;
        };
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        match kind {
            SubscriptionKind::Transactions(id) => state
                .transaction_listeners
                .retain(|(listener_id, _)| *listener_id != id),
            SubscriptionKind::Atom(atom, id) => state.remove_atom_listener(atom, id),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            Some(SubscriptionKind::Atom(atom, _)) => format!("atom {atom}"),
            Some(SubscriptionKind::Transactions(_)) => "transactions".to_string(),
            None => "detached".to_string(),
        };
        f.debug_struct("Subscription").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Deps, TypeSet};
    use serde_json::json;

    fn types(list: &[&str]) -> TypeSet {
        Arc::new(list.iter().map(|t| t.to_string()).collect())
    }

    fn listened(state: &mut StoreState, atom: AtomId) {
        let id = state.next_listener_id();
        let listener: AtomListener = Arc::new(|_: &Value| {});
        state
            .listeners
            .entry(atom)
            .or_insert_with(Vec::new)
            .push((id, listener));
    }

    #[test]
    fn merge_skips_indexing_for_unlistened_atoms() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");
        let record = CacheRecord::leaf(atom, Arc::new(json!(1)), types(&["inc"]));

        let mut changed = Vec::new();
        state.merge_patch(atom, record, &mut changed);

        assert!(state.cache.contains_key(&atom));
        assert!(!state.index.contains("inc", atom));
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn merge_indexes_first_record_of_listened_atom() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");
        listened(&mut state, atom);

        let record = CacheRecord::leaf(atom, Arc::new(json!(1)), types(&["inc"]));
        let mut changed = Vec::new();
        state.merge_patch(atom, record, &mut changed);

        assert!(state.index.contains("inc", atom));
    }

    #[test]
    fn remerging_identical_shape_leaves_index_alone() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");
        listened(&mut state, atom);

        let shared_types = types(&["inc"]);
        let first = CacheRecord::leaf(atom, Arc::new(json!(1)), shared_types.clone());
        let second = CacheRecord::leaf(atom, Arc::new(json!(2)), shared_types);

        let mut changed = Vec::new();
        state.merge_patch(atom, first, &mut changed);
        state.merge_patch(atom, second, &mut changed);

        assert!(state.index.contains("inc", atom));
        assert_eq!(state.index.lookup("inc").map(|b| b.len()), Some(1));
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn shape_change_reindexes_incrementally() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");
        listened(&mut state, atom);

        let first = CacheRecord::leaf(atom, Arc::new(json!(1)), types(&["inc"]));
        let mut changed = Vec::new();
        state.merge_patch(atom, first, &mut changed);

        // New revision reacts to a different type.
        let second = CacheRecord::leaf(atom, Arc::new(json!(1)), types(&["dec"]));
        state.merge_patch(atom, second, &mut changed);

        assert!(!state.index.contains("inc", atom));
        assert!(state.index.contains("dec", atom));
    }

    #[test]
    fn dependency_shape_change_reindexes() {
        let mut state = StoreState::default();
        let atom = state.arena.create("derived");
        listened(&mut state, atom);

        let own_types = types(&[]);
        let dep = CacheRecord::leaf(AtomId::new(), Arc::new(json!(0)), types(&["inc"]));
        let first = CacheRecord::with_deps(
            atom,
            Arc::new(json!(0)),
            Deps::from_vec(vec![dep]),
            own_types.clone(),
        );
        let mut changed = Vec::new();
        state.merge_patch(atom, first, &mut changed);
        assert!(state.index.contains("inc", atom));

        // Dependency dropped: the transitive registration must go too.
        let second = CacheRecord::with_deps(atom, Arc::new(json!(0)), Deps::new(), own_types);
        state.merge_patch(atom, second, &mut changed);
        assert!(!state.index.contains("inc", atom));
    }

    #[test]
    fn unchanged_state_identity_is_not_reported() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");

        let value = Arc::new(json!(1));
        let shared_types = types(&[]);
        let first = CacheRecord::leaf(atom, value.clone(), shared_types.clone());
        let second = CacheRecord::leaf(atom, value, shared_types);

        let mut changed = Vec::new();
        state.merge_patch(atom, first, &mut changed);
        state.merge_patch(atom, second, &mut changed);

        // Only the initial record counts as a change.
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn last_listener_removal_deactivates_but_keeps_cache() {
        let mut state = StoreState::default();
        let atom = state.arena.create("a");
        listened(&mut state, atom);

        let record = CacheRecord::leaf(atom, Arc::new(json!(1)), types(&["inc"]));
        let mut changed = Vec::new();
        state.merge_patch(atom, record, &mut changed);
        assert!(state.index.contains("inc", atom));

        let id = state.listeners[&atom][0].0;
        state.remove_atom_listener(atom, id);

        assert!(!state.index.contains("inc", atom));
        assert!(state.cache.contains_key(&atom));
    }

    #[test]
    fn internal_events_are_unique_per_call() {
        use crate::store::transaction::Transaction;

        struct Never;
        impl Computation for Never {
            fn begin<'tx>(&'tx self, _ctx: TransactionCtx<'tx>) -> Box<dyn Transaction + 'tx> {
                unreachable!("not dispatched in this test")
            }
        }

        let store = Store::new(Never);
        let atom = store.create_atom("counter");

        let first = store.internal_event("init", "counter", atom);
        let second = store.internal_event("init", "counter", atom);

        assert_ne!(first.event_type, second.event_type);
        assert!(first.event_type.starts_with("init \"counter\""));
        assert!(first.targets_atom(atom));
    }
}
