//! Pooled, thread-safe promises.
//!
//! A [`Deferred`] is the producer side of a computation and a [`Promise`]
//! its consumer side. Promises settle exactly once, as resolved, rejected
//! or canceled, and chain into further promises whose callbacks run on the
//! thread that settles their source. Every stage of a chain is a node taken
//! from a per-type free list and handed back once nobody can observe it, so
//! steady-state chaining does not allocate.
//!
//! ```
//! use pooled_promise::{Deferred, Fault};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let (deferred, promise) = Deferred::<u32>::new();
//! let answer = promise
//!     .try_then(|value| if value > 0 { Ok(value) } else { Err(Fault::reject("zero")) })
//!     .catch(|_| Ok(0))
//!     .then(|value| value * 2);
//!
//! let task = thread::spawn(move || block_on(answer));
//! deferred.resolve(21).unwrap();
//! assert_eq!(task.join().expect("The task thread has panicked").unwrap(), 42);
//! ```
//!
//! Cancelation is cooperative: a [`CancelationToken`] attached with
//! [`Promise::with_cancelation`] or [`Deferred::with_cancelation`] races
//! normal completion, and exactly one of them wins.

mod awaiter;
mod cancel;
pub mod combinators;
pub mod config;
mod continuation;
mod deferred;
mod dispatch;
mod error;
mod multi;
mod node;
mod pool;
#[cfg(feature = "progress")]
mod progress;
mod promise;
mod rejection;

pub use cancel::{CancelationRegistration, CancelationSource, CancelationToken, RetainedToken};
pub use combinators::{all_settled, first, first_with_index, merge, race, race_with_index};
pub use deferred::Deferred;
pub use dispatch::{Dispatcher, Job};
pub use error::{AggregateError, DeferredDropped, Failure, Panicked, UsageError};
pub use multi::SharedPromise;
pub use pool::clear as clear_pools;
pub use promise::Promise;
pub use rejection::{Fault, Outcome, Reason, Rejection, State};

static_assertions::assert_impl_all!(Promise<u8>: Send, Sync);
static_assertions::assert_impl_all!(Deferred<u8>: Send, Sync, Clone);
static_assertions::assert_impl_all!(SharedPromise<u8>: Send, Sync, Clone);
static_assertions::assert_impl_all!(CancelationSource: Send, Sync);
static_assertions::assert_impl_all!(CancelationToken: Send, Sync, Clone);
static_assertions::assert_impl_all!(Rejection: Send, Sync);
