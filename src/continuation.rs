//! Continuation nodes: one callback between a source and its consumer.

use crate::error::UsageError;
use crate::node::completion::{self, Propagate};
use crate::node::{self, Node, NodeCore, Waiter};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop, ProgressListener};
#[cfg(feature = "progress")]
use crate::State;
use crate::{Outcome, Promise, Rejection};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

/// What a continuation callback decided.
pub(crate) enum Step<U: Send + 'static> {
    /// Settle the continuation with this outcome.
    Settle(Outcome<U>),
    /// Wait for another promise and settle with whatever it settles with.
    Adopt(Promise<U>),
}

pub(crate) struct ThenNode<T, U, F> {
    core: NodeCore<U>,
    callback: Mutex<Option<F>>,
    /// Set once the callback returned a promise to wait on.
    adopted: AtomicBool,
    _source: PhantomData<fn(T)>,
}

impl<T, U, F> ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            callback: Mutex::new(None),
            adopted: AtomicBool::new(false),
            _source: PhantomData,
        }
    }

    pub(crate) fn take(callback: F, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        *node.callback.lock() = Some(callback);
        node
    }

    fn adopt(self: Arc<Self>, promise: Promise<U>) {
        let Some(inner) = promise.into_node() else {
            let failure = Outcome::Rejected(Rejection::new(UsageError::DoubleAwait));
            if let Err(lost) = completion::complete(self, failure) {
                lost.discard();
            }
            return;
        };

        self.adopted.store(true, Ordering::Release);
        let link: Arc<dyn Waiter<U>> = AdoptLink::take(Arc::clone(&self), inner.core().depth());
        if let Err(error) = node::hookup(inner, link) {
            if let Err(lost) = completion::complete(self, Outcome::Rejected(Rejection::new(error))) {
                lost.discard();
            }
        }
    }
}

impl<T, U, F> Waiter<T> for ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        let Some(callback) = self.callback.lock().take() else {
            outcome.discard();
            return;
        };

        let step = panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).unwrap_or_else(
            |payload| Step::Settle(Outcome::Rejected(Rejection::from_panic(payload))),
        );
        match step {
            Step::Settle(outcome) => {
                if let Err(lost) = completion::complete(self, outcome) {
                    lost.discard();
                }
            }
            Step::Adopt(promise) => self.adopt(promise),
        }
    }

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

#[cfg(feature = "progress")]
impl<T, U, F> ProgressListener for ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    fn on_progress(&self, position: f64) -> Option<Hop> {
        // after adoption only the adopted promise reports for this stage
        if self.adopted.load(Ordering::Acquire) || self.core.state() != State::Pending {
            return None;
        }
        progress::next_hop(&self.core, position)
    }
}

impl<T, U, F> Node for ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    type Output = U;

    fn core(&self) -> &NodeCore<U> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T, U, F> Propagate for ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T, U, F> Poolable for ThenNode<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
{
    fn reset(&self) {
        self.callback.lock().take();
        self.adopted.store(false, Ordering::Relaxed);
        self.core.reset();
    }
}

/// Waits on an adopted promise on behalf of `N`.
pub(crate) struct AdoptLink<N> {
    target: Mutex<Option<Arc<N>>>,
    /// Depth of the adopted promise, to rescale its progress.
    inner_depth: AtomicU16,
}

impl<N: Node + Propagate> AdoptLink<N> {
    fn new() -> Self {
        Self {
            target: Mutex::new(None),
            inner_depth: AtomicU16::new(0),
        }
    }

    pub(crate) fn take(target: Arc<N>, inner_depth: u16) -> Arc<Self> {
        let link = pool::take_or_else(Self::new);
        *link.target.lock() = Some(target);
        link.inner_depth.store(inner_depth, Ordering::Relaxed);
        link
    }
}

impl<N: Node + Propagate> Waiter<N::Output> for AdoptLink<N> {
    fn handle(self: Arc<Self>, outcome: Outcome<N::Output>) {
        let target = self.target.lock().take();
        match target {
            Some(target) => {
                if let Err(lost) = completion::complete(target, outcome) {
                    lost.discard();
                }
            }
            None => outcome.discard(),
        }
        pool::repool_unshared(self);
    }

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

#[cfg(feature = "progress")]
impl<N: Node + Propagate> ProgressListener for AdoptLink<N> {
    fn on_progress(&self, position: f64) -> Option<Hop> {
        let target = self.target.lock().clone()?;
        let inner = progress::normalize(position, self.inner_depth.load(Ordering::Relaxed));
        // the target ignores its source once adopted; skip straight past it
        progress::next_hop(target.core(), f64::from(target.core().depth()) + inner)
    }
}

impl<N: Node + Propagate> Poolable for AdoptLink<N> {
    fn reset(&self) {
        self.target.lock().take();
        self.inner_depth.store(0, Ordering::Relaxed);
    }
}
