//! Reflow Core
//!
//! This crate provides the store engine for the Reflow reactive-state
//! runtime. It implements:
//!
//! - An authoritative cache of immutable per-atom records
//! - Incremental reverse indexing (event type → atoms to recompute)
//! - Atomic event dispatch with transactional patch merging
//! - Liveness-aware laziness: only observed atoms are kept current
//! - Deferred post-commit effects with an all-settled completion barrier
//!
//! The store deliberately does not know how atom values are derived; that
//! is the computation step's job, reached through the [`store::Computation`]
//! trait. A bundled reducer registry implements it for the common case.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: the data model (atom handles, cache records, reverse index)
//! - `store`: the engine (dispatch, merging, subscriptions, lazy reads)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reflow_core::{Event, ReducerRegistry, Store, Subscriber};
//! use serde_json::{json, Value};
//!
//! let registry = Arc::new(ReducerRegistry::new());
//! let store = Store::new(registry.clone());
//!
//! // A counter that reacts to "inc" events.
//! let counter = store.create_atom("counter");
//! registry.define(counter, vec![], ["inc"], |ctx| {
//!     let current = ctx.prev.as_deref().and_then(Value::as_i64).unwrap_or(0);
//!     Ok(Arc::new(json!(current + ctx.matched.len() as i64)))
//! });
//!
//! // Observe it.
//! let _sub = store.subscribe(Subscriber::atom(counter, |state| {
//!     println!("counter is now {state}");
//! }))?;
//!
//! // Drive it.
//! store.dispatch(Event::new("inc", json!(null)))?;
//! // Prints: "counter is now 1"
//! ```

pub mod error;
pub mod graph;
pub mod store;

pub use error::StoreError;
pub use graph::{AtomId, CacheRecord};
pub use store::{
    Commit, Computation, Event, Patch, ReducerCtx, ReducerRegistry, Snapshot, Store, Subscriber,
    Subscription, Transaction, TransactionCtx, TransactionResult,
};
