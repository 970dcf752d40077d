use crate::error::UsageError;
use crate::Outcome;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[cfg(feature = "progress")]
use crate::progress::ProgressListener;

/// Whoever handles a node's outcome next.
pub(crate) trait Waiter<T>: Send + Sync + 'static {
    /// Receives the outcome of the node this waiter was attached to.
    ///
    /// Implementations settle their own node and hand it to
    /// [`completion::schedule`](super::completion::schedule) instead of
    /// calling further waiters directly.
    fn handle(self: Arc<Self>, outcome: Outcome<T>);

    #[cfg(feature = "progress")]
    fn progress_listener(self: Arc<Self>) -> Option<Arc<dyn ProgressListener>> {
        None
    }
}

/// The states of a waiter link.
///
/// ```text
///            attach             attach
///  Unset ───────────► Pending ───────────► Attached
///    │                   │                    │
///    │ forget            │ complete           │ complete
///    ▼                   ▼                    ▼
/// Forgotten          Completed ◄──────────────┘
/// ```
///
/// `complete` moves every state to `Completed` and reports what it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Link {
    /// Nobody has attached yet.
    Unset = 0,
    /// A waiter is being written into the slot.
    Pending = 1,
    /// The slot holds a waiter.
    Attached = 2,
    /// The node completed; attachers must deliver inline.
    Completed = 3,
    /// No waiter will ever attach.
    Forgotten = 4,
}

impl Link {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Link::Unset,
            1 => Link::Pending,
            2 => Link::Attached,
            3 => Link::Completed,
            _ => Link::Forgotten,
        }
    }
}

/// What [`WaiterLink::complete`] found in the link.
pub(crate) enum Detached<T> {
    /// Nobody attached yet; the next attach delivers inline.
    Unset,
    /// An attach is in flight; it will notice completion and deliver inline.
    Pending,
    Attached(Arc<dyn Waiter<T>>),
    Forgotten,
}

/// The result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    /// The waiter will be invoked by the completion protocol.
    Waiting,
    /// The node had already completed; the caller delivers inline.
    Completed,
}

/// The forget counterpart of [`Attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Forget {
    /// The completion protocol will dispose of the node.
    Deferred,
    /// The node had already completed; the caller disposes of it.
    Completed,
}

pub(crate) struct WaiterLink<T> {
    link: AtomicU8,
    slot: Mutex<Option<Arc<dyn Waiter<T>>>>,
}

impl<T> WaiterLink<T> {
    pub(crate) fn new() -> Self {
        Self {
            link: AtomicU8::new(Link::Unset as u8),
            slot: Mutex::new(None),
        }
    }

    fn transition(&self, from: Link, to: Link) -> Result<(), Link> {
        self.link
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(Link::from_u8)
    }

    pub(crate) fn attach(&self, waiter: &Arc<dyn Waiter<T>>) -> Result<Attach, UsageError> {
        match self.transition(Link::Unset, Link::Pending) {
            Ok(()) => {}
            Err(Link::Completed) => return Ok(Attach::Completed),
            Err(_) => return Err(UsageError::DoubleAwait),
        }

        *self.slot.lock() = Some(Arc::clone(waiter));

        match self.transition(Link::Pending, Link::Attached) {
            Ok(()) => Ok(Attach::Waiting),
            Err(actual) => {
                // only completion moves a link out of `Pending` behind our back
                debug_assert_eq!(actual, Link::Completed);
                self.slot.lock().take();
                Ok(Attach::Completed)
            }
        }
    }

    pub(crate) fn forget(&self) -> Result<Forget, UsageError> {
        match self.transition(Link::Unset, Link::Forgotten) {
            Ok(()) => Ok(Forget::Deferred),
            Err(Link::Completed) => Ok(Forget::Completed),
            Err(_) => Err(UsageError::DoubleAwait),
        }
    }

    /// Marks the link completed and returns what it held.
    pub(crate) fn complete(&self) -> Detached<T> {
        let prev = Link::from_u8(self.link.swap(Link::Completed as u8, Ordering::AcqRel));
        match prev {
            Link::Unset => Detached::Unset,
            Link::Pending => Detached::Pending,
            Link::Attached => match self.slot.lock().take() {
                Some(waiter) => Detached::Attached(waiter),
                None => Detached::Pending,
            },
            Link::Forgotten => Detached::Forgotten,
            Link::Completed => {
                debug_assert!(false, "waiter link completed twice");
                Detached::Pending
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        Link::from_u8(self.link.load(Ordering::Acquire)) == Link::Completed
    }

    /// Clones the attached waiter out from under the slot lock.
    pub(crate) fn peek(&self) -> Option<Arc<dyn Waiter<T>>> {
        self.slot.lock().clone()
    }

    pub(crate) fn reset(&self) {
        *self.slot.lock() = None;
        self.link.store(Link::Unset as u8, Ordering::Release);
    }
}
