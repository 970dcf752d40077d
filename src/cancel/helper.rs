//! Racing a token against normal completion.
//!
//! A cancelable node is reachable from two places at once: its source (the
//! normal path) and its token's callback list. The helper keeps the node out
//! of the pool until both are done with it, and lets whichever side claims
//! the payload first win.

use super::{CancelationRegistration, CancelationToken};
use crate::node::completion::{self, Propagate};
use crate::node::{self, Node, NodeCore, Waiter};
use crate::pool::{self, Poolable};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop, ProgressListener};
#[cfg(feature = "progress")]
use crate::State;
use crate::Outcome;
use mycelium_bitfield::bitfield;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

bitfield! {
    /// ```text
    /// | 31      17 | 16      1 |    0     |
    /// |   unused   |  retains  | canceled |
    /// ```
    #[derive(Eq, PartialEq)]
    pub(crate) struct CancelWord<u32> {
        /// The token fired before the normal path claimed the node.
        pub(crate) const CANCELED: bool;
        /// One for the normal path, one for the registration.
        pub(crate) const RETAINS = 16;
    }
}

const RETAIN_ONE: u32 = CancelWord::RETAINS.first_bit();

pub(crate) struct CancelationHelper {
    word: AtomicU32,
    registration: Mutex<Option<CancelationRegistration>>,
}

impl CancelationHelper {
    pub(crate) fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            registration: Mutex::new(None),
        }
    }

    fn load(&self) -> CancelWord {
        CancelWord::from_bits(self.word.load(Ordering::Acquire))
    }

    /// Hooks `node` up to `token`. The helper holds one retain on `node`
    /// until both the normal path and the registration are finished.
    ///
    /// If the token is already canceled, `on_cancel` runs before this
    /// returns.
    pub(crate) fn register<N, F>(&self, node: &Arc<N>, token: &CancelationToken, on_cancel: F)
    where
        N: Node,
        F: FnOnce(Arc<N>) + Send + 'static,
    {
        node.core().retain();
        self.word.store(
            CancelWord::new().with(CancelWord::RETAINS, 2).0,
            Ordering::Release,
        );

        let target = Arc::clone(node);
        match token.register(move || on_cancel(target)) {
            Ok(registration) => *self.registration.lock() = Some(registration),
            Err(error) => {
                tracing::trace!(%error, "token can no longer cancel");
                self.release(node);
            }
        }
    }

    /// Marks the node canceled. Returns `false` if it already was.
    pub(crate) fn set_canceled(&self) -> bool {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let word = CancelWord::from_bits(bits);
                if word.get(CancelWord::CANCELED) {
                    None
                } else {
                    Some(word.with(CancelWord::CANCELED, true).0)
                }
            })
            .is_ok()
    }

    /// Whether the normal path may still claim the node.
    pub(crate) fn try_make_ready(&self) -> bool {
        !self.load().get(CancelWord::CANCELED)
    }

    /// Called once by the normal path when it is done with the node.
    pub(crate) fn finish_normal<N: Node>(&self, node: &Arc<N>) {
        if self.load().get(CancelWord::RETAINS) == 0 {
            // never registered with a token
            return;
        }
        let registration = self.registration.lock().take();
        if registration.is_some_and(CancelationRegistration::unregister) {
            self.release(node);
        }
        self.release(node);
    }

    /// Called by the token callback once it is done with the node.
    pub(crate) fn finish_canceled<N: Node>(&self, node: &Arc<N>) {
        self.release(node);
    }

    fn release<N: Node>(&self, node: &Arc<N>) {
        let prev = CancelWord::from_bits(self.word.fetch_sub(RETAIN_ONE, Ordering::AcqRel));
        debug_assert!(prev.get(CancelWord::RETAINS) > 0, "cancel helper over-released");
        if prev.get(CancelWord::RETAINS) == 1 {
            node::release(node);
        }
    }

    pub(crate) fn reset(&self) {
        self.registration.lock().take();
        self.word.store(0, Ordering::Release);
    }
}

/// Passes its source's outcome through unless its token fires first.
pub(crate) struct CancelableNode<T> {
    core: NodeCore<T>,
    helper: CancelationHelper,
}

impl<T: Send + 'static> CancelableNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            helper: CancelationHelper::new(),
        }
    }

    pub(crate) fn take(depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        node
    }

    pub(crate) fn register(self: &Arc<Self>, token: &CancelationToken) {
        self.helper.register(self, token, |node: Arc<Self>| node.cancel());
    }

    fn cancel(self: Arc<Self>) {
        if self.helper.set_canceled() {
            tracing::trace!("promise canceled by token");
            if let Err(lost) = completion::complete(Arc::clone(&self), Outcome::Canceled) {
                lost.discard();
            }
        }
        self.helper.finish_canceled(&self);
    }
}

impl<T: Send + 'static> Waiter<T> for CancelableNode<T> {
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        if self.helper.try_make_ready() {
            if let Err(lost) = completion::complete(Arc::clone(&self), outcome) {
                lost.discard();
            }
        } else {
            outcome.discard();
        }
        self.helper.finish_normal(&self);
    }

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        Some(self)
    }
}

#[cfg(feature = "progress")]
impl<T: Send + 'static> ProgressListener for CancelableNode<T> {
    fn on_progress(&self, position: f64) -> Option<Hop> {
        if self.core.state() != State::Pending {
            return None;
        }
        progress::next_hop(&self.core, position)
    }
}

impl<T: Send + 'static> Node for CancelableNode<T> {
    type Output = T;

    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static> Propagate for CancelableNode<T> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static> Poolable for CancelableNode<T> {
    fn reset(&self) {
        self.helper.reset();
        self.core.reset();
    }
}
