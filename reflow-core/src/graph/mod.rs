//! Dependency Graph Structures
//!
//! This module holds the data model the store engine operates on:
//!
//! - `atom`: atom handles and the registry of live atoms
//! - `cache`: immutable per-atom cache records and the reactivity-shape diff
//! - `index`: the event-type → atoms reverse index
//!
//! Nothing here computes values or notifies anyone; these are the inert
//! structures the engine in [`crate::store`] mutates.

mod atom;
mod cache;
mod index;

pub use atom::{AtomArena, AtomId};
pub use cache::{is_types_change, CacheRecord, Deps, TypeSet};
pub use index::ReverseIndex;
