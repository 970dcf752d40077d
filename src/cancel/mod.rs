//! Cancelation sources, tokens and registrations.
//!
//! A [`CancelationSource`] owns the state; [`CancelationToken`]s are weak
//! views of it that can be handed to any number of consumers. Sources can be
//! linked to other sources' tokens, forming a DAG that cancels downstream
//! only.
//!
//! ```
//! use pooled_promise::CancelationSource;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let upstream = CancelationSource::new();
//! let downstream = CancelationSource::linked([&upstream.token()]);
//!
//! let fired = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&fired);
//! downstream
//!     .token()
//!     .register(move || flag.store(true, Ordering::SeqCst))
//!     .unwrap();
//!
//! upstream.cancel().unwrap();
//! assert!(downstream.is_canceled());
//! assert!(fired.load(Ordering::SeqCst));
//! ```

pub(crate) mod helper;

use crate::error::{AggregateError, UsageError};
use crate::Rejection;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const CANCELED: u8 = 0b01;
const DISPOSED: u8 = 0b10;

type Callback = Box<dyn FnOnce() + Send>;

struct Callbacks {
    next_id: u64,
    /// In registration order.
    entries: Vec<(u64, Callback)>,
    /// Where a linked source is registered on its inputs.
    parents: Vec<CancelationRegistration>,
}

struct SourceInner {
    state: AtomicU8,
    callbacks: Mutex<Callbacks>,
}

impl SourceInner {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            callbacks: Mutex::new(Callbacks {
                next_id: 1,
                entries: Vec::new(),
                parents: Vec::new(),
            }),
        }
    }

    fn is_canceled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELED != 0
    }

    fn register(self: &Arc<Self>, callback: Callback) -> Result<CancelationRegistration, UsageError> {
        let mut callbacks = self.callbacks.lock();
        let state = self.state.load(Ordering::Acquire);
        if state & CANCELED != 0 {
            drop(callbacks);
            callback();
            // id 0 is never handed out, so unregistering finds nothing
            return Ok(CancelationRegistration {
                source: Some(Arc::clone(self)),
                id: 0,
            });
        }
        if state & DISPOSED != 0 {
            return Err(UsageError::DisposedToken);
        }

        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.entries.push((id, callback));
        Ok(CancelationRegistration {
            source: Some(Arc::clone(self)),
            id,
        })
    }

    fn unregister(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock();
        match callbacks.entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                let (_, callback) = callbacks.entries.remove(index);
                drop(callbacks);
                drop(callback);
                true
            }
            // already taken by `cancel`, or dropped by `dispose`
            None => !self.is_canceled(),
        }
    }

    fn cancel(&self) -> Result<(), AggregateError> {
        let entries = {
            let mut callbacks = self.callbacks.lock();
            if self.state.load(Ordering::Acquire) != 0 {
                return Ok(());
            }
            self.state.fetch_or(CANCELED, Ordering::AcqRel);
            std::mem::take(&mut callbacks.entries)
        };
        tracing::trace!(callbacks = entries.len(), "canceling");

        let mut errors = Vec::new();
        for (_, callback) in entries {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                // a linked source rethrows its own aggregate; flatten it
                match payload.downcast::<AggregateError>() {
                    Ok(aggregate) => errors.extend(aggregate.into_errors()),
                    Err(payload) => errors.push(Rejection::from_panic(payload)),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(errors))
        }
    }

    fn dispose(&self) {
        let (entries, parents) = {
            let mut callbacks = self.callbacks.lock();
            self.state.fetch_or(DISPOSED, Ordering::AcqRel);
            (
                std::mem::take(&mut callbacks.entries),
                std::mem::take(&mut callbacks.parents),
            )
        };
        tracing::trace!(dropped = entries.len(), "cancelation source disposed");
        drop(entries);
        for parent in parents {
            parent.unregister();
        }
    }
}

/// Owns a cancelation state and the right to cancel it.
pub struct CancelationSource {
    inner: Arc<SourceInner>,
}

impl CancelationSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SourceInner::new()),
        }
    }

    /// A source that is canceled when any of `tokens` is. Canceling it does
    /// not touch its inputs.
    pub fn linked<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a CancelationToken>,
    {
        let source = Self::new();
        for token in tokens {
            let downstream = Arc::downgrade(&source.inner);
            let registration = token.register(move || {
                let Some(inner) = downstream.upgrade() else {
                    return;
                };
                if let Err(aggregate) = inner.cancel() {
                    panic::resume_unwind(Box::new(aggregate));
                }
            });
            match registration {
                Ok(registration) => source.inner.callbacks.lock().parents.push(registration),
                Err(error) => tracing::debug!(%error, "skipping a dead input token"),
            }
        }
        source
    }

    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            inner: Some(Arc::downgrade(&self.inner)),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    /// Runs every registered callback, in registration order, on this
    /// thread. Later calls do nothing.
    ///
    /// A panicking callback does not stop the others; every panic is
    /// returned together once all callbacks have run.
    pub fn cancel(&self) -> Result<(), AggregateError> {
        self.inner.cancel()
    }

    /// Drops every registered callback without running it and detaches
    /// from linked inputs. Same as dropping the source.
    pub fn dispose(self) {}
}

impl Default for CancelationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelationSource {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for CancelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationSource")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// A weak view of a [`CancelationSource`].
#[derive(Clone, Default)]
pub struct CancelationToken {
    /// `None` for a token that can never be canceled.
    inner: Option<Weak<SourceInner>>,
}

impl CancelationToken {
    /// A token that is never canceled.
    pub fn none() -> Self {
        Self::default()
    }

    fn upgrade(&self) -> Option<Arc<SourceInner>> {
        self.inner.as_ref()?.upgrade()
    }

    pub fn is_canceled(&self) -> bool {
        self.upgrade().is_some_and(|inner| inner.is_canceled())
    }

    /// Whether canceling is still possible or has already happened.
    pub fn can_be_canceled(&self) -> bool {
        self.upgrade()
            .is_some_and(|inner| inner.state.load(Ordering::Acquire) != DISPOSED)
    }

    /// Registers `callback` to run when the source is canceled. If it
    /// already is, `callback` runs before this returns.
    pub fn register<F>(&self, callback: F) -> Result<CancelationRegistration, UsageError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.is_none() {
            return Ok(CancelationRegistration {
                source: None,
                id: 0,
            });
        }
        let inner = self.upgrade().ok_or(UsageError::DisposedToken)?;
        inner.register(Box::new(callback))
    }

    /// Keeps the source's state alive past the source itself.
    pub fn retain(&self) -> Result<RetainedToken, UsageError> {
        match &self.inner {
            None => Ok(RetainedToken { inner: None }),
            Some(_) => {
                let inner = self.upgrade().ok_or(UsageError::DisposedToken)?;
                Ok(RetainedToken { inner: Some(inner) })
            }
        }
    }
}

impl fmt::Debug for CancelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// A token that keeps its source's state alive.
#[derive(Clone)]
pub struct RetainedToken {
    inner: Option<Arc<SourceInner>>,
}

impl RetainedToken {
    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            inner: self.inner.as_ref().map(Arc::downgrade),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.is_canceled())
    }
}

/// A callback registered with a [`CancelationToken`].
///
/// Dropping a registration leaves the callback registered.
#[must_use = "dropping a registration does not unregister its callback"]
pub struct CancelationRegistration {
    source: Option<Arc<SourceInner>>,
    id: u64,
}

impl CancelationRegistration {
    /// Removes the callback. Returns `true` only if the callback is
    /// guaranteed never to run.
    pub fn unregister(self) -> bool {
        match &self.source {
            None => true,
            Some(source) => source.unregister(self.id),
        }
    }
}

impl fmt::Debug for CancelationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationRegistration")
            .field("id", &self.id)
            .finish()
    }
}
