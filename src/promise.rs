use crate::awaiter::PromiseAwaiter;
use crate::cancel::helper::CancelableNode;
use crate::cancel::CancelationToken;
use crate::continuation::{Step, ThenNode};
use crate::dispatch::{DispatchNode, Dispatcher};
use crate::error::UsageError;
use crate::multi::{MultiNode, SharedPromise};
use crate::node::{self, Node, Waiter};
#[cfg(feature = "progress")]
use crate::progress::ProgressNode;
use crate::{Deferred, Fault, Outcome, Reason, Rejection, State};
use std::fmt;
use std::sync::Arc;

/// The consumer side of a deferred computation.
///
/// A promise is consumed by exactly one of: chaining a continuation onto it,
/// awaiting it, [`preserve`](Promise::preserve)-ing it, or dropping it.
/// Callbacks run on whichever thread settles the source, unless
/// [`continue_on`](Promise::continue_on) moves them elsewhere.
///
/// # Examples
///
/// ```
/// use pooled_promise::Deferred;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (deferred, promise) = Deferred::<u32>::new();
/// let doubled = promise.then(|value| value * 2);
/// let task = thread::spawn(move || deferred.resolve(21));
/// assert_eq!(block_on(doubled).unwrap(), 42);
/// task.join().expect("The producer thread has panicked").unwrap();
/// ```
#[must_use = "dropping a promise forgets it; rejections it carries are reported as unhandled"]
pub struct Promise<T: Send + 'static> {
    pub(crate) node: Option<Arc<dyn Node<Output = T>>>,
    pub(crate) id: u16,
    pub(crate) awaiter: Option<Arc<PromiseAwaiter<T>>>,
}

#[track_caller]
pub(crate) fn misuse(error: UsageError) -> ! {
    panic!("{error}")
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn from_node<N: Node<Output = T>>(node: Arc<N>) -> Self {
        let id = node.core().generation();
        Self {
            node: Some(node),
            id,
            awaiter: None,
        }
    }

    /// A promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        Self::settled(Outcome::Resolved(value))
    }

    /// A promise that is already rejected with `reason`.
    pub fn rejected<R: Reason>(reason: R) -> Self {
        Self::settled(Outcome::Rejected(Rejection::new(reason)))
    }

    pub fn canceled() -> Self {
        Self::settled(Outcome::Canceled)
    }

    pub(crate) fn settled(outcome: Outcome<T>) -> Self {
        let (deferred, promise) = Deferred::new();
        deferred.settle(outcome);
        promise
    }

    /// Gives up the node for another node to consume.
    pub(crate) fn into_node(mut self) -> Option<Arc<dyn Node<Output = T>>> {
        self.awaiter = None;
        self.node.take()
    }

    /// Takes the node for consumption, panicking on a handle that was
    /// already consumed.
    #[track_caller]
    pub(crate) fn take_source(&mut self) -> Arc<dyn Node<Output = T>> {
        let Some(node) = self.node.take() else {
            misuse(UsageError::DoubleAwait)
        };
        if node.core().generation() != self.id {
            misuse(UsageError::StaleHandle);
        }
        node
    }

    #[track_caller]
    pub(crate) fn attach(source: Arc<dyn Node<Output = T>>, waiter: Arc<dyn Waiter<T>>) {
        if let Err(error) = node::hookup(source, waiter) {
            misuse(error);
        }
    }

    #[track_caller]
    fn chain<U, F>(mut self, added_depth: u16, callback: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
    {
        let source = self.take_source();
        let depth = source.core().depth().saturating_add(added_depth);
        let node = ThenNode::take(callback, depth);
        let promise = Promise::from_node(Arc::clone(&node));
        Self::attach(source, node);
        promise
    }

    /// Maps the resolved value. Rejections and cancelation pass through.
    pub fn then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(0, move |outcome| {
            Step::Settle(match outcome.forward() {
                Ok(value) => Outcome::Resolved(on_resolved(value)),
                Err(passed) => passed,
            })
        })
    }

    /// Like [`then`](Promise::then), but the callback may reject or cancel.
    pub fn try_then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, Fault> + Send + 'static,
    {
        self.chain(0, move |outcome| {
            Step::Settle(match outcome.forward() {
                Ok(value) => Outcome::from_callback(on_resolved(value), None),
                Err(passed) => passed,
            })
        })
    }

    /// Continues with the promise the callback returns, settling with
    /// whatever that promise settles with.
    pub fn and_then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.chain(1, move |outcome| match outcome.forward() {
            Ok(value) => Step::Adopt(on_resolved(value)),
            Err(passed) => Step::Settle(passed),
        })
    }

    /// Handles a rejection. Returning [`Fault::Rethrow`] re-raises the
    /// incoming rejection unchanged. Cancelation skips the handler.
    pub fn catch<F>(self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Rejection) -> Result<T, Fault> + Send + 'static,
    {
        self.chain(0, move |outcome| {
            Step::Settle(match outcome {
                Outcome::Rejected(rejection) => {
                    rejection.mark_handled();
                    let incoming = rejection.clone();
                    Outcome::from_callback(on_rejected(rejection), Some(&incoming))
                }
                passed => passed,
            })
        })
    }

    /// Handles cancelation. Rejections skip the handler.
    pub fn catch_cancelation<F>(self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
    {
        self.chain(0, move |outcome| {
            Step::Settle(match outcome {
                Outcome::Canceled => Outcome::from_callback(on_canceled(), None),
                passed => passed,
            })
        })
    }

    /// Runs `on_finally` however the promise settles and passes the outcome
    /// on. A panic in `on_finally` replaces the outcome with a rejection.
    pub fn finally<F>(self, on_finally: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.chain(0, move |outcome| {
            on_finally();
            Step::Settle(outcome)
        })
    }

    /// Runs `on_settled` with the outcome, whatever it is.
    pub fn continue_with<U, F>(self, on_settled: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> Result<U, Fault> + Send + 'static,
    {
        self.chain(0, move |outcome| {
            let incoming = match &outcome {
                Outcome::Rejected(rejection) => {
                    rejection.mark_handled();
                    Some(rejection.clone())
                }
                _ => None,
            };
            Step::Settle(Outcome::from_callback(on_settled(outcome), incoming.as_ref()))
        })
    }

    /// Cancels the returned promise as soon as `token` is canceled, unless
    /// it settled first. A token whose source is gone never cancels.
    pub fn with_cancelation(mut self, token: &CancelationToken) -> Promise<T> {
        let source = self.take_source();
        let node = CancelableNode::take(source.core().depth());
        node.register(token);
        let promise = Promise::from_node(Arc::clone(&node));
        Self::attach(source, node);
        promise
    }

    /// Opts into multiple consumers.
    pub fn preserve(mut self) -> SharedPromise<T>
    where
        T: Clone,
    {
        let source = self.take_source();
        let node = MultiNode::take(source.core().depth());
        let shared = SharedPromise::new(Arc::clone(&node));
        Self::attach(source, node);
        shared
    }

    /// Settles the returned promise from a job handed to `dispatcher`, so
    /// every continuation chained after it runs wherever the dispatcher
    /// runs jobs.
    pub fn continue_on(mut self, dispatcher: Arc<dyn Dispatcher>) -> Promise<T> {
        let source = self.take_source();
        let node = DispatchNode::take(dispatcher, source.core().depth());
        let promise = Promise::from_node(Arc::clone(&node));
        Self::attach(source, node);
        promise
    }

    /// Calls `on_progress` with values in `[0, 1]` as the chain before this
    /// point reports progress, and with `1.0` once it resolves.
    #[cfg(feature = "progress")]
    pub fn progress<F>(mut self, on_progress: F) -> Promise<T>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let source = self.take_source();
        let node = ProgressNode::take(on_progress, source.core().depth());
        let promise = Promise::from_node(Arc::clone(&node));
        Self::attach(source, node);
        promise
    }

    /// Declares that nobody will consume this promise. Same as dropping it.
    pub fn forget(self) {}

    /// Whether the promise has settled.
    pub fn is_completed(&self) -> Result<bool, UsageError> {
        match (&self.node, &self.awaiter) {
            (Some(node), _) if node.core().generation() != self.id => Err(UsageError::StaleHandle),
            (Some(node), _) => Ok(node.core().state() != State::Pending),
            (None, Some(awaiter)) => Ok(awaiter.is_done()),
            (None, None) => Err(UsageError::DoubleAwait),
        }
    }

    /// Runs `on_completed` once the promise settles.
    pub fn on_completed<F>(self, on_completed: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.continue_with(move |outcome| {
            on_completed(outcome);
            Ok(())
        })
        .forget();
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            if let Err(error) = node.forget() {
                tracing::debug!(%error, "forgetting a dropped promise failed");
            }
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id)
            .field("completed", &self.is_completed().ok())
            .finish()
    }
}
