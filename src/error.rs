use crate::Rejection;
use thiserror::Error;

/// A caller bug. These are never retried or swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A second waiter tried to attach to a promise that already has one, or
    /// a forgotten promise was awaited.
    #[error("promise was already awaited or forgotten; preserve it to await it more than once")]
    DoubleAwait,
    /// The handle refers to a node that has since been recycled.
    #[error("handle is stale: the promise it referred to has completed and been recycled")]
    StaleHandle,
    /// The token's source was disposed or dropped.
    #[error("cancelation token is no longer valid: its source has been disposed")]
    DisposedToken,
    #[error("`Fault::Rethrow` may only be returned from a rejection handler")]
    InvalidRethrow,
    #[error("progress must be a finite value between 0 and 1")]
    InvalidProgress,
    #[error("race and first need at least one promise")]
    EmptyCombinator,
}

/// Why an awaited promise did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    #[error("promise was rejected: {0}")]
    Rejected(Rejection),
    #[error("promise was canceled")]
    Canceled,
}

impl Failure {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Failure::Canceled)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Failure::Rejected(rejection) => Some(rejection),
            Failure::Canceled => None,
        }
    }
}

/// Every panic raised by the callbacks of one [`cancel`] call.
///
/// [`cancel`]: crate::CancelationSource::cancel
#[derive(Debug, Error)]
#[error("{} cancelation callback(s) panicked", .errors.len())]
pub struct AggregateError {
    errors: Vec<Rejection>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<Rejection>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[Rejection] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Rejection> {
        self.errors
    }
}

/// The rejection reason used when the last handle to a pending deferred goes
/// away without settling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deferred was dropped without being resolved, rejected or canceled")]
pub struct DeferredDropped;

/// The rejection reason for a callback that panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback panicked: {0}")]
pub struct Panicked(pub String);
