//! Store Runtime
//!
//! This module implements the reactive store engine and its collaborators:
//!
//! - `engine`: the store itself (dispatch loop, patch merging, subscription
//!   lifecycle, lazy reads, snapshot collection)
//! - `transaction`: the boundary to the external computation step
//! - `reducers`: the bundled computation step (a reducer registry)
//! - `event`: events and snapshots
//! - `effect`: deferred post-commit effects and the completion barrier
//! - `listener`: listener types and panic isolation
//!
//! # Concepts
//!
//! ## Atoms and cache records
//!
//! An atom is a reactive cell identity; its latest computed value and
//! reactivity metadata live in an immutable cache record the store replaces
//! on every recomputation. See [`crate::graph`].
//!
//! ## Push where observed, pull where not
//!
//! Atoms with active listeners are kept current: the reverse index routes
//! each dispatched event to exactly the atoms that must react, and their
//! listeners are notified of committed value changes. Atoms nobody observes
//! are left alone: their cached value may go stale, and reading one forces
//! a one-shot recomputation instead.
//!
//! ## Transactions
//!
//! Every dispatch is atomic: either the whole transient patch commits, or,
//! if the computation step fails on any atom, none of it does.

mod effect;
mod engine;
mod event;
mod listener;
mod reducers;
mod transaction;

pub use effect::{Commit, Effect, EffectFuture};
pub use engine::{Store, Subscription};
pub use event::{Event, Snapshot};
pub use listener::{AtomListener, Subscriber, TransactionListener};
pub use reducers::{ReduceFn, ReducerCtx, ReducerRegistry};
pub use transaction::{
    CacheView, Computation, Patch, Transaction, TransactionCtx, TransactionResult,
};
