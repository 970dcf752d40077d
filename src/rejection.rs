//! Payload types: what a node settles with.

use crate::config;
use crate::error::{Failure, Panicked, UsageError};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Anything that can be used as a rejection reason.
pub trait Reason: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<R: Any + fmt::Debug + Send + Sync> Reason for R {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A shared rejection container.
///
/// Cloning retains the container and dropping releases it, so one rejection
/// can fan out to every branch of a preserved promise without copying the
/// reason.
#[derive(Clone)]
pub struct Rejection {
    inner: Arc<RejectionInner>,
}

struct RejectionInner {
    reason: Box<dyn Reason>,
    handled: AtomicBool,
}

impl Rejection {
    pub fn new<R: Reason>(reason: R) -> Self {
        Self {
            inner: Arc::new(RejectionInner {
                reason: Box::new(reason),
                handled: AtomicBool::new(false),
            }),
        }
    }

    /// Converts a caught panic payload into a rejection.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Rejection>() {
            Ok(rejection) => return *rejection,
            Err(payload) => payload,
        };
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::new(Panicked(message))
    }

    /// Returns the reason if it is an `R`.
    pub fn reason<R: Reason>(&self) -> Option<&R> {
        // deref through the box, otherwise `Box<dyn Reason>`'s own impl answers
        (*self.inner.reason).as_any().downcast_ref::<R>()
    }

    pub fn reason_dyn(&self) -> &dyn Reason {
        &*self.inner.reason
    }

    /// Returns `true` if both handles share the same container.
    pub fn ptr_eq(&self, other: &Rejection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_handled(&self) {
        self.inner.handled.store(true, Ordering::Release);
    }

    /// Re-raises this rejection: same container, handled again by nobody.
    pub(crate) fn rethrow(&self) -> Rejection {
        self.inner.handled.store(false, Ordering::Release);
        self.clone()
    }

    pub fn is_handled(&self) -> bool {
        self.inner.handled.load(Ordering::Acquire)
    }

    /// Sends this rejection to the unhandled-rejection sink, once.
    pub(crate) fn report_unhandled(&self) {
        if !self.inner.handled.swap(true, Ordering::AcqRel) {
            config::report_unhandled(self.clone());
        }
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejection").field(&self.inner.reason).finish()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inner.reason)
    }
}

/// The observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Pending = 0,
    Resolved = 1,
    Rejected = 2,
    Canceled = 3,
}

impl State {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => State::Resolved,
            2 => State::Rejected,
            3 => State::Canceled,
            _ => State::Pending,
        }
    }
}

/// How a promise settled.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Resolved(T),
    Rejected(Rejection),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> State {
        match self {
            Outcome::Resolved(_) => State::Resolved,
            Outcome::Rejected(_) => State::Rejected,
            Outcome::Canceled => State::Canceled,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    /// Converts into a `Result`, marking any rejection as handled.
    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Outcome::Resolved(value) => Ok(value),
            Outcome::Rejected(rejection) => {
                rejection.mark_handled();
                Err(Failure::Rejected(rejection))
            }
            Outcome::Canceled => Err(Failure::Canceled),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Resolved(value) => Outcome::Resolved(f(value)),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
            Outcome::Canceled => Outcome::Canceled,
        }
    }

    /// Splits off the resolved value; anything else is re-typed so it can be
    /// passed further down the chain unchanged.
    pub(crate) fn forward<U>(self) -> Result<T, Outcome<U>> {
        match self {
            Outcome::Resolved(value) => Ok(value),
            Outcome::Rejected(rejection) => Err(Outcome::Rejected(rejection)),
            Outcome::Canceled => Err(Outcome::Canceled),
        }
    }

    /// Interprets what a callback returned. `incoming` is the rejection the
    /// callback was handling, if any; `Fault::Rethrow` re-raises it as is.
    pub(crate) fn from_callback(result: Result<T, Fault>, incoming: Option<&Rejection>) -> Self {
        match result {
            Ok(value) => Outcome::Resolved(value),
            Err(Fault::Reject(rejection)) => Outcome::Rejected(rejection),
            Err(Fault::Cancel) => Outcome::Canceled,
            Err(Fault::Rethrow) => match incoming {
                Some(rejection) => Outcome::Rejected(rejection.rethrow()),
                None => Outcome::Rejected(Rejection::new(UsageError::InvalidRethrow)),
            },
        }
    }

    /// Called when an outcome is thrown away; rejections must not vanish.
    pub(crate) fn discard(self) {
        if let Outcome::Rejected(rejection) = self {
            rejection.report_unhandled();
        }
    }
}

/// What a fallible callback can return instead of a value.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Reject the next promise with this reason.
    Reject(Rejection),
    /// Cancel the next promise. Rejection handlers are skipped.
    Cancel,
    /// Re-raise the rejection currently being handled, unchanged.
    Rethrow,
}

impl Fault {
    pub fn reject<R: Reason>(reason: R) -> Self {
        Fault::Reject(Rejection::new(reason))
    }
}

impl From<Rejection> for Fault {
    fn from(rejection: Rejection) -> Self {
        Fault::Reject(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_downcasts() {
        let rejection = Rejection::new("boom");
        assert_eq!(rejection.reason::<&str>(), Some(&"boom"));
        assert!(rejection.reason::<String>().is_none());
        assert_eq!(rejection.to_string(), "\"boom\"");
    }

    #[test]
    fn rethrow_reuses_the_incoming_container() {
        let incoming = Rejection::new(7_u32);
        incoming.mark_handled();
        let outcome = Outcome::<()>::from_callback(Err(Fault::Rethrow), Some(&incoming));
        match outcome {
            Outcome::Rejected(rejection) => {
                assert!(rejection.ptr_eq(&incoming));
                assert!(!rejection.is_handled());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rethrow_outside_a_handler_is_a_usage_error() {
        let outcome = Outcome::<()>::from_callback(Err(Fault::Rethrow), None);
        match outcome {
            Outcome::Rejected(rejection) => {
                assert_eq!(rejection.reason::<UsageError>(), Some(&UsageError::InvalidRethrow))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn panic_payloads_become_panicked() {
        let rejection = Rejection::from_panic(Box::new("oh no"));
        assert_eq!(rejection.reason::<Panicked>(), Some(&Panicked("oh no".into())));

        let original = Rejection::new(1_i32);
        let rethrown = Rejection::from_panic(Box::new(original.clone()));
        assert!(rethrown.ptr_eq(&original));
    }

    #[test]
    fn into_result_marks_handled() {
        let rejection = Rejection::new("x");
        let outcome: Outcome<()> = Outcome::Rejected(rejection.clone());
        assert!(!rejection.is_handled());
        assert!(outcome.into_result().is_err());
        assert!(rejection.is_handled());
    }
}
