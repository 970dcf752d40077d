//! Preserved promises: one source, any number of consumers.

use crate::continuation::{Step, ThenNode};
use crate::error::UsageError;
use crate::node::completion::{self, Propagate};
use crate::node::{self, Node, NodeCore, Waiter};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop, ProgressListener};
use crate::{Outcome, Promise, State};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Broadcasts its source's outcome to every waiter, in attach order.
///
/// Retains: one held until the source delivers, one per [`SharedPromise`]
/// and one per waiter still to be served.
pub(crate) struct MultiNode<T> {
    core: NodeCore<T>,
    waiters: Mutex<Vec<Arc<dyn Waiter<T>>>>,
    /// Some waiter has seen the outcome.
    delivered: AtomicBool,
}

impl<T: Clone + Send + 'static> MultiNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            waiters: Mutex::new(Vec::new()),
            delivered: AtomicBool::new(false),
        }
    }

    pub(crate) fn take(depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        node
    }
}

impl<T: Clone + Send + 'static> Waiter<T> for MultiNode<T> {
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        if let Err(lost) = completion::complete(self, outcome) {
            lost.discard();
        }
    }

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

#[cfg(feature = "progress")]
impl<T: Clone + Send + 'static> ProgressListener for MultiNode<T> {
    fn on_progress(&self, position: f64) -> Option<Hop> {
        if self.core.state() != State::Pending {
            return None;
        }
        let waiters = self.waiters.lock().clone();
        for waiter in waiters {
            if let Some(listener) = waiter.progress_listener() {
                progress::walk(listener, position);
            }
        }
        None
    }
}

impl<T: Clone + Send + 'static> Node for MultiNode<T> {
    type Output = T;

    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        if !self.delivered.load(Ordering::Acquire) {
            if let Some(outcome) = self.core.take_outcome() {
                outcome.discard();
            }
        }
        pool::repool(self);
    }

    fn add_waiter(
        self: Arc<Self>,
        waiter: &Arc<dyn Waiter<T>>,
    ) -> Result<Option<Outcome<T>>, UsageError> {
        let mut waiters = self.waiters.lock();
        // `propagate` takes the list under this lock after the state is
        // published, so a pending state here means we will be served
        if self.core.state() == State::Pending {
            self.core.retain();
            waiters.push(Arc::clone(waiter));
            return Ok(None);
        }
        drop(waiters);

        self.delivered.store(true, Ordering::Release);
        self.core
            .clone_outcome()
            .map(Some)
            .ok_or(UsageError::StaleHandle)
    }
}

impl<T: Clone + Send + 'static> Propagate for MultiNode<T> {
    fn propagate(self: Arc<Self>) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        tracing::trace!(waiters = waiters.len(), "broadcasting");
        if !waiters.is_empty() {
            self.delivered.store(true, Ordering::Release);
        }
        for waiter in waiters {
            if let Some(outcome) = self.core.clone_outcome() {
                waiter.handle(outcome);
            }
            node::release(&self);
        }
        node::release(&self);
    }
}

impl<T: Clone + Send + 'static> Poolable for MultiNode<T> {
    fn reset(&self) {
        self.waiters.lock().clear();
        self.delivered.store(false, Ordering::Relaxed);
        self.core.reset();
    }
}

/// A promise that can be consumed any number of times.
///
/// Every consumer sees a clone of the outcome; a rejection is shared, not
/// copied. Consumers that attach after the source settled are served
/// inline.
///
/// # Examples
///
/// ```
/// use pooled_promise::Deferred;
/// use futures::executor::block_on;
///
/// let (deferred, promise) = Deferred::<u32>::new();
/// let shared = promise.preserve();
/// let plus_one = shared.then(|value| value + 1);
/// let same = shared.duplicate();
///
/// deferred.resolve(1).unwrap();
/// assert_eq!(block_on(plus_one).unwrap(), 2);
/// assert_eq!(block_on(same).unwrap(), 1);
/// assert_eq!(block_on(shared.duplicate()).unwrap(), 1);
/// ```
pub struct SharedPromise<T: Clone + Send + 'static> {
    node: Arc<MultiNode<T>>,
}

impl<T: Clone + Send + 'static> SharedPromise<T> {
    pub(crate) fn new(node: Arc<MultiNode<T>>) -> Self {
        node.core.retain();
        Self { node }
    }

    /// A new single-consumer promise that settles like this one.
    pub fn duplicate(&self) -> Promise<T> {
        let node = ThenNode::take(Step::<T>::Settle, self.node.core.depth());
        let promise = Promise::from_node(Arc::clone(&node));
        let source: Arc<dyn Node<Output = T>> = Arc::clone(&self.node) as _;
        Promise::attach(source, node);
        promise
    }

    pub fn then<U, F>(&self, on_resolved: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.duplicate().then(on_resolved)
    }

    pub fn is_completed(&self) -> bool {
        self.node.core.state() != State::Pending
    }
}

impl<T: Clone + Send + 'static> Clone for SharedPromise<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.node))
    }
}

impl<T: Clone + Send + 'static> Drop for SharedPromise<T> {
    fn drop(&mut self) {
        node::release(&self.node);
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for SharedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPromise")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Deferred;
    use futures::executor::block_on;

    #[test]
    fn waiters_are_served_in_attach_order() {
        let (deferred, promise) = Deferred::<u8>::new();
        let shared = promise.preserve();
        let order = Arc::new(Mutex::new(Vec::new()));

        let branches: Vec<_> = (0..3)
            .map(|index| {
                let order = Arc::clone(&order);
                shared.then(move |value| order.lock().push((index, value)))
            })
            .collect();
        deferred.resolve(9).unwrap();

        for branch in branches {
            block_on(branch).unwrap();
        }
        assert_eq!(*order.lock(), vec![(0, 9), (1, 9), (2, 9)]);
    }

    #[test]
    fn node_is_recycled_after_the_last_shared_handle() {
        // a type no other test pools
        #[derive(Clone, Debug, PartialEq)]
        struct Only(u8);

        let (deferred, promise) = Deferred::<Only>::new();
        let shared = promise.preserve();
        let node = Arc::clone(&shared.node);
        let copy = shared.clone();
        let branch = shared.duplicate();

        deferred.resolve(Only(1)).unwrap();
        assert!(shared.is_completed());
        assert_eq!(block_on(branch).unwrap(), Only(1));
        drop(shared);
        assert!(!node.core.is_idle());
        drop(copy);
        assert!(node.core.is_idle());
    }

    #[test]
    fn shared_rejections_are_the_same_container() {
        let (deferred, promise) = Deferred::<u8>::new();
        let shared = promise.preserve();
        let first = shared.duplicate();
        let second = shared.duplicate();
        deferred.reject("shared").unwrap();

        let first = block_on(first).unwrap_err();
        let second = block_on(second).unwrap_err();
        let (Some(first), Some(second)) = (first.rejection(), second.rejection()) else {
            panic!("both branches must be rejected");
        };
        assert!(first.ptr_eq(second));
    }
}
