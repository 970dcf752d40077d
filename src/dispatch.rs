//! Moving continuations onto an executor.

use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore, Waiter};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop, ProgressListener};
#[cfg(feature = "progress")]
use crate::State;
use crate::Outcome;
use parking_lot::Mutex;
use std::sync::Arc;

/// A unit of work handed to a [`Dispatcher`].
pub type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs somewhere else: a thread pool, an event loop, a UI thread.
///
/// A job that is dropped without running leaves the promise waiting on it
/// pending forever.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

impl<F: Fn(Job) + Send + Sync> Dispatcher for F {
    fn dispatch(&self, job: Job) {
        self(job)
    }
}

/// Settles from inside a dispatched job.
pub(crate) struct DispatchNode<T> {
    core: NodeCore<T>,
    dispatcher: Mutex<Option<Arc<dyn Dispatcher>>>,
}

impl<T: Send + 'static> DispatchNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            dispatcher: Mutex::new(None),
        }
    }

    pub(crate) fn take(dispatcher: Arc<dyn Dispatcher>, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        *node.dispatcher.lock() = Some(dispatcher);
        node
    }
}

fn settle<T: Send + 'static>(node: Arc<DispatchNode<T>>, outcome: Outcome<T>) {
    if let Err(lost) = completion::complete(node, outcome) {
        lost.discard();
    }
}

impl<T: Send + 'static> Waiter<T> for DispatchNode<T> {
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        let dispatcher = self.dispatcher.lock().take();
        match dispatcher {
            Some(dispatcher) => {
                tracing::trace!("dispatching continuation");
                dispatcher.dispatch(Box::new(move || settle(self, outcome)));
            }
            None => settle(self, outcome),
        }
    }

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

#[cfg(feature = "progress")]
impl<T: Send + 'static> ProgressListener for DispatchNode<T> {
    fn on_progress(&self, position: f64) -> Option<Hop> {
        if self.core.state() != State::Pending {
            return None;
        }
        progress::next_hop(&self.core, position)
    }
}

impl<T: Send + 'static> Node for DispatchNode<T> {
    type Output = T;

    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static> Propagate for DispatchNode<T> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static> Poolable for DispatchNode<T> {
    fn reset(&self) {
        self.dispatcher.lock().take();
        self.core.reset();
    }
}
