use super::FanIn;
use crate::node::{self, Waiter};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop, ProgressListener};
use crate::Outcome;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

/// Subscribes a combinator to one of its inputs.
pub(crate) struct PassThrough<C> {
    owner: Mutex<Option<Arc<C>>>,
    index: AtomicUsize,
    /// Depth of the input, to normalize its progress.
    depth: AtomicU16,
}

impl<C: FanIn> PassThrough<C> {
    fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            index: AtomicUsize::new(0),
            depth: AtomicU16::new(0),
        }
    }

    pub(crate) fn take(owner: Arc<C>, index: usize, depth: u16) -> Arc<Self> {
        let link = pool::take_or_else(Self::new);
        *link.owner.lock() = Some(owner);
        link.index.store(index, Ordering::Relaxed);
        link.depth.store(depth, Ordering::Relaxed);
        link
    }
}

impl<C: FanIn> Waiter<C::Input> for PassThrough<C> {
    fn handle(self: Arc<Self>, outcome: Outcome<C::Input>) {
        let owner = self.owner.lock().take();
        match owner {
            Some(owner) => {
                owner.report(self.index.load(Ordering::Relaxed), outcome);
                node::release(&owner);
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
impl<C: FanIn> ProgressListener for PassThrough<C> {
    fn on_progress(&self, position: f64) -> Option<Hop> {
        let owner = self.owner.lock().clone()?;
        let fraction = progress::normalize(position, self.depth.load(Ordering::Relaxed));
        owner.report_progress(self.index.load(Ordering::Relaxed), fraction)
    }
}

impl<C: FanIn> Poolable for PassThrough<C> {
    fn reset(&self) {
        self.owner.lock().take();
        self.index.store(0, Ordering::Relaxed);
        self.depth.store(0, Ordering::Relaxed);
    }
}
