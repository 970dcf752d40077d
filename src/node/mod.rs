//! The pooled, reference-counted unit every promise is built from.
//!
//! A node owns one stage of a computation: its state word, its payload slot,
//! the link to whoever consumes it next and its lifetime word. Concrete node
//! kinds (continuations, deferreds, combinators, ...) embed a [`NodeCore`]
//! and implement [`Node`] so the engine can drive them through a vtable.

pub(crate) mod completion;
pub(crate) mod lifetime;
pub(crate) mod waiter;

use crate::error::UsageError;
use crate::{Outcome, State};
use lifetime::LifetimeCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use waiter::{Attach, Forget, WaiterLink};

pub(crate) use waiter::Waiter;

/// Marks a payload slot that has been claimed but whose state has not been
/// published yet. Readers observe it as `Pending`.
const CLAIMED: u8 = 4;

pub(crate) struct NodeCore<T> {
    state: AtomicU8,
    outcome: Mutex<Option<Outcome<T>>>,
    pub(crate) waiter: WaiterLink<T>,
    lifetime: LifetimeCell,
    /// Asynchronous stages between the root producer and this node.
    depth: AtomicU16,
}

impl<T> NodeCore<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Pending as u8),
            outcome: Mutex::new(None),
            waiter: WaiterLink::new(),
            lifetime: LifetimeCell::new(),
            depth: AtomicU16::new(0),
        }
    }

    pub(crate) fn state(&self) -> State {
        match self.state.load(Ordering::Acquire) {
            CLAIMED => State::Pending,
            raw => State::from_u8(raw),
        }
    }

    /// Claims the payload slot and publishes `outcome`. Exactly one caller
    /// wins; everybody else gets their outcome back.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> Result<(), Outcome<T>> {
        if self
            .state
            .compare_exchange(
                State::Pending as u8,
                CLAIMED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(outcome);
        }

        let state = outcome.state();
        *self.outcome.lock() = Some(outcome);
        self.state.store(state as u8, Ordering::Release);
        tracing::trace!(?state, "node settled");
        Ok(())
    }

    pub(crate) fn take_outcome(&self) -> Option<Outcome<T>> {
        self.outcome.lock().take()
    }

    pub(crate) fn clone_outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.outcome.lock().clone()
    }

    pub(crate) fn generation(&self) -> u16 {
        self.lifetime.generation()
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.lifetime.is_idle()
    }

    /// Puts a node fresh from the pool (or the allocator) into service with
    /// one retain, held by its consumer. Returns the generation to stamp on
    /// handles.
    pub(crate) fn revive(&self) -> u16 {
        self.lifetime.revive()
    }

    pub(crate) fn retain(&self) {
        self.lifetime.retain();
    }

    /// Returns `true` if this dropped the last retain.
    pub(crate) fn release(&self) -> bool {
        self.lifetime.release()
    }

    pub(crate) fn depth(&self) -> u16 {
        self.depth.load(Ordering::Relaxed)
    }

    pub(crate) fn set_depth(&self, depth: u16) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    /// Clears everything a previous use could have left behind.
    pub(crate) fn reset(&self) {
        self.outcome.lock().take();
        self.waiter.reset();
        self.state.store(State::Pending as u8, Ordering::Release);
        self.depth.store(0, Ordering::Relaxed);
        self.lifetime.retire();
    }
}

/// One stage of a promise chain, as seen by the engine.
pub(crate) trait Node: Send + Sync + 'static {
    type Output: Send + 'static;

    fn core(&self) -> &NodeCore<Self::Output>;

    /// Called once the last retain is released.
    fn dispose(self: Arc<Self>);

    /// Attaches `waiter` as this node's consumer.
    ///
    /// Returns the outcome if the node had already completed; the caller must
    /// then deliver it to `waiter` itself.
    fn add_waiter(
        self: Arc<Self>,
        waiter: &Arc<dyn Waiter<Self::Output>>,
    ) -> Result<Option<Outcome<Self::Output>>, UsageError> {
        match self.core().waiter.attach(waiter)? {
            Attach::Waiting => Ok(None),
            Attach::Completed => {
                let outcome = self.core().take_outcome();
                release(&self);
                outcome.map(Some).ok_or(UsageError::StaleHandle)
            }
        }
    }

    /// Declares that nobody will ever consume this node.
    fn forget(self: Arc<Self>) -> Result<(), UsageError> {
        match self.core().waiter.forget()? {
            Forget::Deferred => Ok(()),
            Forget::Completed => {
                if let Some(outcome) = self.core().take_outcome() {
                    outcome.discard();
                }
                release(&self);
                Ok(())
            }
        }
    }
}

/// Drops one retain from `node`, disposing of it if that was the last.
pub(crate) fn release<N: Node + ?Sized>(node: &Arc<N>) {
    if node.core().release() {
        Arc::clone(node).dispose();
    }
}

/// Connects `waiter` to `node`, delivering inline if `node` already completed.
pub(crate) fn hookup<T: Send + 'static>(
    node: Arc<dyn Node<Output = T>>,
    waiter: Arc<dyn Waiter<T>>,
) -> Result<(), UsageError> {
    if let Some(outcome) = node.add_waiter(&waiter)? {
        tracing::trace!("delivering inline");
        waiter.handle(outcome);
    }
    Ok(())
}
