//! Best-effort progress reporting.
//!
//! Positions travel down a chain as absolute values: a node at depth `d`
//! covers the range `[d, d + 1]`. Listeners that call user code normalize
//! by their own depth. Nothing here affects how promises settle.

use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore, Waiter};
use crate::pool::{self, Poolable};
use crate::Outcome;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The next listener and the position to hand it.
pub(crate) type Hop = (Arc<dyn ProgressListener>, f64);

pub(crate) trait ProgressListener: Send + Sync {
    fn on_progress(&self, position: f64) -> Option<Hop>;
}

/// Walks listeners until one of them stops the report.
pub(crate) fn walk(mut listener: Arc<dyn ProgressListener>, mut position: f64) {
    while let Some((next, next_position)) = listener.on_progress(position) {
        listener = next;
        position = next_position;
    }
}

/// Looks up whoever consumes `core` without taking it from the link.
pub(crate) fn next_hop<T: 'static>(core: &NodeCore<T>, position: f64) -> Option<Hop> {
    let listener = core.waiter.peek()?.progress_listener()?;
    Some((listener, position))
}

/// Reports `fraction` of the stage `core` stands for.
pub(crate) fn report<T: 'static>(core: &NodeCore<T>, fraction: f64) {
    if let Some((listener, position)) = next_hop(core, f64::from(core.depth()) + fraction) {
        walk(listener, position);
    }
}

/// Maps an absolute position reported by a node of `depth` into `[0, 1]`.
pub(crate) fn normalize(position: f64, depth: u16) -> f64 {
    (position / (f64::from(depth) + 1.0)).clamp(0.0, 1.0)
}

/// Where a progress node's callback currently is.
enum Slot<F> {
    Empty,
    Ready(F),
    /// A report is running the callback with the lock released.
    Busy,
    /// The node settled while a report was running; that report makes the
    /// final call.
    Settled { resolved: bool },
}

/// A pass-through stage that shows progress to user code.
pub(crate) struct ProgressNode<T, F> {
    core: NodeCore<T>,
    callback: Mutex<Slot<F>>,
}

impl<T, F> ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            callback: Mutex::new(Slot::Empty),
        }
    }

    pub(crate) fn take(callback: F, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        *node.callback.lock() = Slot::Ready(callback);
        node
    }
}

fn invoke<F: FnMut(f64)>(callback: &mut F, value: f64) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        tracing::warn!(value, "progress callback panicked");
    }
}

impl<T, F> Waiter<T> for ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        let resolved = outcome.is_resolved();
        let callback = {
            let mut slot = self.callback.lock();
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Ready(callback) => Some(callback),
                Slot::Busy => {
                    *slot = Slot::Settled { resolved };
                    None
                }
                Slot::Empty | Slot::Settled { .. } => None,
            }
        };
        if let (Some(mut callback), true) = (callback, resolved) {
            invoke(&mut callback, 1.0);
        }
        if let Err(lost) = completion::complete(self, outcome) {
            lost.discard();
        }
    }

    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

impl<T, F> ProgressListener for ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    fn on_progress(&self, position: f64) -> Option<Hop> {
        let taken = {
            let mut slot = self.callback.lock();
            match std::mem::replace(&mut *slot, Slot::Busy) {
                Slot::Ready(callback) => Some(callback),
                // another report is running; this one is dropped
                Slot::Busy => None,
                idle @ (Slot::Empty | Slot::Settled { .. }) => {
                    *slot = idle;
                    return None;
                }
            }
        };

        // the callback may settle this very node, so no lock is held here
        if let Some(mut callback) = taken {
            let generation = self.core.generation();
            invoke(&mut callback, normalize(position, self.core.depth()));
            let mut slot = self.callback.lock();
            if self.core.generation() != generation {
                // recycled while the callback ran
                return None;
            }
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Busy => *slot = Slot::Ready(callback),
                Slot::Settled { resolved } => {
                    drop(slot);
                    if resolved {
                        invoke(&mut callback, 1.0);
                    }
                    return None;
                }
                Slot::Empty | Slot::Ready(_) => return None,
            }
        }
        next_hop(&self.core, position)
    }
}

impl<T, F> Node for ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    type Output = T;

    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T, F> Propagate for ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T, F> Poolable for ProgressNode<T, F>
where
    T: Send + 'static,
    F: FnMut(f64) + Send + 'static,
{
    fn reset(&self) {
        *self.callback.lock() = Slot::Empty;
        self.core.reset();
    }
}
