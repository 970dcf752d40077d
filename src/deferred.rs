use crate::cancel::helper::CancelationHelper;
use crate::cancel::CancelationToken;
use crate::error::{DeferredDropped, UsageError};
use crate::node::completion::{self, Propagate};
use crate::node::{self, Node, NodeCore};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress;
use crate::{Outcome, Promise, Reason, Rejection};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) struct DeferredNode<T> {
    core: NodeCore<T>,
    /// Bumped by whoever settles the node through a handle or a token.
    /// Never reset, so handles from an earlier use stay stale.
    deferred_id: AtomicU16,
    /// Live `Deferred` handles for the current use.
    handles: AtomicUsize,
    helper: CancelationHelper,
}

impl<T: Send + 'static> DeferredNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            deferred_id: AtomicU16::new(0),
            handles: AtomicUsize::new(0),
            helper: CancelationHelper::new(),
        }
    }

    fn claim(&self, id: u16) -> bool {
        self.deferred_id
            .compare_exchange(id, id.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_settle(self: &Arc<Self>, id: u16, outcome: Outcome<T>) -> bool {
        if !self.claim(id) {
            return false;
        }
        // winning the claim means nobody else settles this use
        if let Err(lost) = completion::complete(Arc::clone(self), outcome) {
            lost.discard();
        }
        self.helper.finish_normal(self);
        true
    }

    fn cancel_from_token(self: Arc<Self>, id: u16) {
        if self.claim(id) {
            tracing::trace!("deferred canceled by token");
            self.helper.set_canceled();
            if let Err(lost) = completion::complete(Arc::clone(&self), Outcome::Canceled) {
                lost.discard();
            }
            self.helper.finish_normal(&self);
        }
        self.helper.finish_canceled(&self);
    }
}

impl<T: Send + 'static> Node for DeferredNode<T> {
    type Output = T;

    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static> Propagate for DeferredNode<T> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static> Poolable for DeferredNode<T> {
    fn reset(&self) {
        self.handles.store(0, Ordering::Relaxed);
        self.helper.reset();
        self.core.reset();
    }
}

/// The producer side of a promise.
///
/// Handles can be cloned and sent to other threads; the first one to settle
/// wins and every handle is stale afterwards. Dropping the last handle
/// while the promise is still pending rejects it with [`DeferredDropped`].
///
/// # Examples
///
/// ```
/// use pooled_promise::{Deferred, UsageError};
/// use futures::executor::block_on;
///
/// let (deferred, promise) = Deferred::<&str>::new();
/// let late = deferred.clone();
/// deferred.resolve("first").unwrap();
/// assert_eq!(late.resolve("second"), Err(UsageError::StaleHandle));
/// assert_eq!(block_on(promise).unwrap(), "first");
/// ```
pub struct Deferred<T: Send + 'static> {
    node: Arc<DeferredNode<T>>,
    id: u16,
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new() -> (Self, Promise<T>) {
        Self::create(None)
    }

    /// Like [`new`](Deferred::new), but canceling `token` cancels the
    /// promise if it is still pending. A token whose source is gone never
    /// cancels.
    pub fn with_cancelation(token: &CancelationToken) -> (Self, Promise<T>) {
        Self::create(Some(token))
    }

    fn create(token: Option<&CancelationToken>) -> (Self, Promise<T>) {
        let node = pool::take_or_else(DeferredNode::new);
        // one retain for the consumer, one shared by every handle
        node.core.revive();
        node.core.retain();
        node.handles.store(1, Ordering::Relaxed);
        let id = node.deferred_id.load(Ordering::Acquire);
        let promise = Promise::from_node(Arc::clone(&node));

        if let Some(token) = token {
            node.helper
                .register(&node, token, move |node: Arc<DeferredNode<T>>| {
                    node.cancel_from_token(id)
                });
        }
        (Self { node, id }, promise)
    }

    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        self.node.try_settle(self.id, outcome)
    }

    fn settle_or_stale(&self, outcome: Outcome<T>) -> Result<(), UsageError> {
        if self.settle(outcome) {
            Ok(())
        } else {
            Err(UsageError::StaleHandle)
        }
    }

    pub fn resolve(&self, value: T) -> Result<(), UsageError> {
        self.settle_or_stale(Outcome::Resolved(value))
    }

    pub fn try_resolve(&self, value: T) -> bool {
        self.settle(Outcome::Resolved(value))
    }

    pub fn reject<R: Reason>(&self, reason: R) -> Result<(), UsageError> {
        self.settle_or_stale(Outcome::Rejected(Rejection::new(reason)))
    }

    pub fn try_reject<R: Reason>(&self, reason: R) -> bool {
        self.settle(Outcome::Rejected(Rejection::new(reason)))
    }

    pub fn cancel(&self) -> Result<(), UsageError> {
        self.settle_or_stale(Outcome::Canceled)
    }

    pub fn try_cancel(&self) -> bool {
        self.settle(Outcome::Canceled)
    }

    /// Whether this handle can still settle the promise.
    pub fn is_valid(&self) -> bool {
        self.node.deferred_id.load(Ordering::Acquire) == self.id
    }

    /// Reports how far along the pending computation is, `value` in `[0, 1]`.
    #[cfg(feature = "progress")]
    pub fn report_progress(&self, value: f64) -> Result<(), UsageError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(UsageError::InvalidProgress);
        }
        if !self.is_valid() {
            return Err(UsageError::StaleHandle);
        }
        progress::report(&self.node.core, value);
        Ok(())
    }
}

impl<T: Send + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        self.node.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            node: Arc::clone(&self.node),
            id: self.id,
        }
    }
}

impl<T: Send + 'static> Drop for Deferred<T> {
    fn drop(&mut self) {
        if self.node.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let dropped = Outcome::Rejected(Rejection::new(DeferredDropped));
        if self.node.try_settle(self.id, dropped) {
            tracing::debug!("deferred dropped while pending");
        }
        node::release(&self.node);
    }
}
