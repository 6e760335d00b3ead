//! Deferred Effects
//!
//! Computations may queue work that must run only after the dispatch that
//! produced it has fully committed and notified its listeners: persisting,
//! fetching, dispatching follow-up events. Each such effect is a one-shot
//! callback receiving a [`Store`] handle, free to suspend and to dispatch
//! again.
//!
//! # Ordering
//!
//! Effects never run before their own dispatch's listener notifications.
//! Between themselves, and against later unrelated dispatches, they may
//! interleave arbitrarily; an effect must not assume it runs before or
//! after any future dispatch.
//!
//! # The completion barrier
//!
//! [`Commit`] is the completion signal a dispatch returns: a future that
//! resolves once every effect of that dispatch has settled, succeeded or
//! failed. An effect failure (a panic, in this engine) is terminal for that
//! effect alone: it is logged and swallowed, never surfaced through the
//! barrier and never allowed to starve a sibling.
//!
//! When a tokio runtime is present the effects are spawned immediately as
//! independent tasks and the `Commit` merely joins them. Without a runtime
//! the effects are carried by the `Commit` and run, joined, when it is
//! awaited. Dropping it unawaited abandons them.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

use crate::store::engine::Store;

/// The future produced by invoking an effect.
pub type EffectFuture = BoxFuture<'static, ()>;

/// A deferred post-commit callback, invoked with the store as its sole
/// argument.
pub type Effect = Box<dyn FnOnce(Store) -> EffectFuture + Send>;

/// Completion signal for one dispatch: resolves once every deferred effect
/// has settled. Individual effect failures are not surfaced.
pub struct Commit {
    inner: BoxFuture<'static, ()>,
}

impl Commit {
    /// A commit with no pending effects.
    pub(crate) fn idle() -> Self {
        Self {
            inner: Box::pin(future::ready(())),
        }
    }

    /// Schedule the effects of a committed dispatch.
    pub(crate) fn schedule(effects: Vec<Effect>, store: Store) -> Self {
        if effects.is_empty() {
            return Self::idle();
        }

        // Invoking the callback builds the effect future; a panic here is
        // that effect's failure, isolated like any other.
        let mut futures = Vec::with_capacity(effects.len());
        for effect in effects {
            let store = store.clone();
            match std::panic::catch_unwind(AssertUnwindSafe(move || effect(store))) {
                Ok(fut) => futures.push(fut),
                Err(_) => tracing::error!("deferred effect panicked while starting"),
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tasks: Vec<_> = futures.into_iter().map(|fut| handle.spawn(fut)).collect();
                Self {
                    inner: Box::pin(async move {
                        for task in tasks {
                            if let Err(err) = task.await {
                                if err.is_panic() {
                                    tracing::error!("deferred effect panicked");
                                }
                            }
                        }
                    }),
                }
            }
            Err(_) => Self {
                inner: Box::pin(async move {
                    let settled = future::join_all(
                        futures
                            .into_iter()
                            .map(|fut| AssertUnwindSafe(fut).catch_unwind()),
                    )
                    .await;
                    for outcome in settled {
                        if outcome.is_err() {
                            tracing::error!("deferred effect panicked");
                        }
                    }
                }),
            },
        }
    }
}

impl Future for Commit {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commit").finish_non_exhaustive()
    }
}
