//! Reducer Registry
//!
//! The store only orchestrates; deriving an atom's value is the computation
//! step's job. This module is the bundled computation step: a registry of
//! per-atom definitions, each declaring
//!
//! - the atoms it reads (`deps`, processed first so their records are
//!   current),
//! - the event types it reacts to directly (`types`, shared behind one
//!   `Arc` per definition so an unchanged reactivity shape is detectable by
//!   identity),
//! - a reduce closure producing the new state from a [`ReducerCtx`].
//!
//! During one dispatch each atom is processed at most once. An atom with a
//! previous record is carried through untouched when nothing relevant
//! happened (no matching event, not an explicit target, no dependency
//! record replaced), so an unchanged atom keeps its state identity and the
//! store reports no change for it.
//!
//! Reduce closures can queue deferred work with [`ReducerCtx::defer`]; the
//! store runs it after the dispatch commits and notifies.
//!
//! The registry refuses cyclic definitions at processing time: a dependency
//! chain that reaches an atom already being processed fails the dispatch
//! with an error naming the atom, rather than recursing forever.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::StoreError;
use crate::graph::{AtomId, CacheRecord, Deps, TypeSet};
use crate::store::effect::Effect;
use crate::store::engine::Store;
use crate::store::event::Event;
use crate::store::transaction::{Computation, Patch, Transaction, TransactionCtx};

/// The reduce closure: derives an atom's new state from its context.
///
/// Returning the previous `Arc` unchanged signals "same value" to the
/// store's identity-based change detection.
pub type ReduceFn =
    Arc<dyn Fn(&mut ReducerCtx<'_>) -> Result<Arc<Value>, StoreError> + Send + Sync>;

/// One atom's definition in the registry.
#[derive(Clone)]
struct AtomDef {
    deps: Vec<AtomId>,
    types: TypeSet,
    reduce: ReduceFn,
}

/// Everything a reduce closure may consult.
pub struct ReducerCtx<'a> {
    /// The atom being computed.
    pub atom: AtomId,
    /// The previously committed state, if any.
    pub prev: Option<Arc<Value>>,
    /// Current records of the declared dependencies, in declaration order.
    pub deps: &'a [Arc<CacheRecord>],
    /// All events of this dispatch, in dispatch order.
    pub events: &'a [Event],
    /// The subset of events whose type is in this atom's declared types.
    pub matched: &'a [&'a Event],
    /// Seed value for this atom from the construction snapshot, if any.
    pub seed: Option<&'a Value>,
    effects: &'a mut Vec<Effect>,
}

impl ReducerCtx<'_> {
    /// The state of the dependency at `index` in declaration order.
    pub fn dep_state(&self, index: usize) -> Option<&Value> {
        self.deps.get(index).map(|record| record.state.as_ref())
    }

    /// Queue deferred work to run after this dispatch commits and its
    /// listeners are notified. The callback receives a store handle and may
    /// dispatch again.
    pub fn defer<F, Fut>(&mut self, effect: F)
    where
        F: FnOnce(Store) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.effects
            .push(Box::new(move |store| effect(store).boxed()));
    }
}

/// A registry of atom definitions, usable as the store's computation step.
///
/// Share it between the store and the defining code:
///
/// ```rust,ignore
/// let registry = Arc::new(ReducerRegistry::new());
/// let store = Store::new(registry.clone());
///
/// let counter = store.create_atom("counter");
/// registry.define(counter, vec![], ["inc"], |ctx| {
///     let current = ctx.prev.as_deref().and_then(Value::as_i64).unwrap_or(0);
///     Ok(Arc::new(json!(current + ctx.matched.len() as i64)))
/// });
/// ```
#[derive(Default)]
pub struct ReducerRegistry {
    defs: RwLock<IndexMap<AtomId, AtomDef>>,
}

impl ReducerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) an atom's reducer.
    pub fn define<F>(
        &self,
        atom: AtomId,
        deps: Vec<AtomId>,
        types: impl IntoIterator<Item = impl Into<String>>,
        reduce: F,
    ) where
        F: Fn(&mut ReducerCtx<'_>) -> Result<Arc<Value>, StoreError> + Send + Sync + 'static,
    {
        let types: TypeSet = Arc::new(types.into_iter().map(Into::into).collect());
        self.defs.write().insert(
            atom,
            AtomDef {
                deps,
                types,
                reduce: Arc::new(reduce),
            },
        );
    }

    /// Define a plain value cell: no dependencies, no reactive types. It
    /// computes once (from the seed snapshot when present, else `initial`)
    /// and afterwards only changes through explicitly targeted events
    /// handled elsewhere.
    pub fn define_value(&self, atom: AtomId, initial: Value) {
        self.define(atom, Vec::new(), Vec::<String>::new(), move |ctx| {
            Ok(match (&ctx.prev, ctx.seed) {
                (Some(prev), _) => prev.clone(),
                (None, Some(seed)) => Arc::new(seed.clone()),
                (None, None) => Arc::new(initial.clone()),
            })
        });
    }

    /// Remove an atom's definition.
    pub fn undefine(&self, atom: AtomId) {
        self.defs.write().shift_remove(&atom);
    }
}

impl Computation for ReducerRegistry {
    fn begin<'tx>(&'tx self, ctx: TransactionCtx<'tx>) -> Box<dyn Transaction + 'tx> {
        Box::new(ReducerTransaction {
            registry: self,
            ctx,
            effects: Vec::new(),
            in_flight: IndexSet::new(),
        })
    }
}

struct ReducerTransaction<'tx> {
    registry: &'tx ReducerRegistry,
    ctx: TransactionCtx<'tx>,
    effects: Vec<Effect>,
    in_flight: IndexSet<AtomId>,
}

impl Transaction for ReducerTransaction<'_> {
    fn process(&mut self, atom: AtomId, patch: &mut Patch) -> Result<(), StoreError> {
        if patch.contains(atom) {
            return Ok(());
        }

        let name = self
            .ctx
            .cache
            .name(atom)
            .map(str::to_owned)
            .ok_or(StoreError::UnknownAtom(atom))?;

        if !self.in_flight.insert(atom) {
            return Err(StoreError::computation(name, "dependency cycle detected"));
        }

        let def = self
            .registry
            .defs
            .read()
            .get(&atom)
            .cloned()
            .ok_or_else(|| StoreError::computation(name.clone(), "no reducer defined"))?;

        for &dep in &def.deps {
            self.process(dep, patch)?;
        }

        let deps: Deps = def
            .deps
            .iter()
            .map(|dep| {
                patch
                    .get(*dep)
                    .or_else(|| self.ctx.cache.record(*dep))
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::computation(name.clone(), format!("dependency {dep} missing"))
                    })
            })
            .collect::<Result<_, _>>()?;

        let previous = self.ctx.cache.record(atom).cloned();
        let targeted = self
            .ctx
            .events
            .iter()
            .any(|event| event.targets_atom(atom));
        let matched: Vec<&Event> = self
            .ctx
            .events
            .iter()
            .filter(|event| def.types.contains(event.event_type.as_str()))
            .collect();

        let unchanged = previous.as_ref().is_some_and(|prev| {
            !targeted
                && matched.is_empty()
                && Arc::ptr_eq(&prev.types, &def.types)
                && prev.deps.len() == deps.len()
                && prev.deps.iter().zip(&deps).all(|(a, b)| Arc::ptr_eq(a, b))
        });

        let record = match (&previous, unchanged) {
            (Some(prev), true) => prev.clone(),
            _ => {
                let mut reducer_ctx = ReducerCtx {
                    atom,
                    prev: previous.as_ref().map(|record| record.state.clone()),
                    deps: &deps,
                    events: self.ctx.events,
                    matched: &matched,
                    seed: self.ctx.snapshot.get(&name),
                    effects: &mut self.effects,
                };
                let state = (def.reduce)(&mut reducer_ctx)?;
                CacheRecord::with_deps(atom, state, deps.clone(), def.types.clone())
            }
        };

        self.in_flight.swap_remove(&atom);
        patch.insert(atom, record);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<Effect> {
        self.effects
    }
}
