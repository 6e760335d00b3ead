//! Listeners
//!
//! Two kinds of observer watch a store:
//!
//! - per-atom listeners, invoked with the new state whenever their atom's
//!   value changes in a committed dispatch
//! - transaction listeners, invoked with every [`TransactionResult`], one
//!   call per dispatch, success or failure
//!
//! A faulty observer must not break the others or the dispatch flow, so
//! every callback invocation goes through [`call_safety`]: a panic is
//! caught, logged, and dropped at the call site.
//!
//! Subscription targets are an explicit tagged choice ([`Subscriber`])
//! rather than an overloaded entry point, so "subscribe to this atom" and
//! "subscribe to every transaction" cannot be confused.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;

use crate::graph::AtomId;
use crate::store::transaction::TransactionResult;

/// Per-atom state-change callback.
pub type AtomListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Per-dispatch transaction callback.
pub type TransactionListener = Arc<dyn Fn(&TransactionResult) + Send + Sync>;

/// What a subscription observes.
pub enum Subscriber {
    /// State changes of one atom.
    Atom {
        /// The observed atom.
        atom: AtomId,
        /// Invoked with the new state after each committed change.
        listener: AtomListener,
    },
    /// Every dispatched transaction, regardless of outcome.
    Transactions {
        /// Invoked with each transaction's result.
        listener: TransactionListener,
    },
}

impl Subscriber {
    /// Subscribe to one atom's state changes.
    pub fn atom(atom: AtomId, listener: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self::Atom {
            atom,
            listener: Arc::new(listener),
        }
    }

    /// Subscribe to every transaction result.
    pub fn transactions(listener: impl Fn(&TransactionResult) + Send + Sync + 'static) -> Self {
        Self::Transactions {
            listener: Arc::new(listener),
        }
    }
}

/// Invoke a callback, isolating any panic it raises.
pub(crate) fn call_safety(label: &str, f: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!("{label} panicked: {}", panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn call_safety_runs_the_callback() {
        let ran = AtomicBool::new(false);
        call_safety("listener", || ran.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn call_safety_swallows_panics() {
        call_safety("listener", || panic!("observer bug"));
        // Reaching this line is the assertion.
    }

    #[test]
    fn call_safety_swallows_string_panics() {
        call_safety("listener", || panic!("{}", String::from("formatted")));
    }
}
