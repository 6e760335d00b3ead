//! Store Errors
//!
//! Two of these are surfaced to callers (invalid usage and computation
//! failure); listener and effect failures are isolated where they happen and
//! never become a `StoreError`.

use thiserror::Error;

use crate::graph::AtomId;

/// Errors reported by the store engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A malformed call: reported synchronously, before any state mutation.
    #[error("invalid {0}")]
    InvalidUsage(String),

    /// A handle that was freed or never belonged to this store.
    #[error("unknown atom handle {0}")]
    UnknownAtom(AtomId),

    /// The external computation step failed while processing an atom. The
    /// in-flight dispatch is aborted and nothing is committed.
    #[error("computation failed for atom `{atom}`: {reason}")]
    Computation { atom: String, reason: String },

    /// A forced read asked the computation step to process an atom, but no
    /// record for it landed in the patch.
    #[error("atom `{0}` was not computed by the transaction")]
    NotComputed(String),
}

impl StoreError {
    /// Convenience constructor for computation failures.
    pub fn computation(atom: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Computation {
            atom: atom.into(),
            reason: reason.into(),
        }
    }
}
