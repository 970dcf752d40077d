//! Driving a promise from `async` code.

use crate::error::Failure;
use crate::node::Waiter;
use crate::promise::misuse;
use crate::{Outcome, Promise};
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// The waiter a polled promise attaches to its node.
pub(crate) struct PromiseAwaiter<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    waker: AtomicWaker,
    done: AtomicBool,
}

impl<T: Send + 'static> PromiseAwaiter<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            waker: AtomicWaker::new(),
            done: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Waiter<T> for PromiseAwaiter<T> {
    fn handle(self: Arc<Self>, outcome: Outcome<T>) {
        *self.outcome.lock() = Some(outcome);
        self.done.store(true, Ordering::Release);
        self.waker.wake();
    }
}

impl<T> Drop for PromiseAwaiter<T> {
    fn drop(&mut self) {
        // the future went away before picking the outcome up
        if let Some(outcome) = self.outcome.get_mut().take() {
            outcome.discard();
        }
    }
}

impl<T: Send + 'static> Future for Promise<T> {
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let awaiter = match &this.awaiter {
            Some(awaiter) => Arc::clone(awaiter),
            None => {
                let source = this.take_source();
                let awaiter = Arc::new(PromiseAwaiter::new());
                awaiter.waker.register(cx.waker());
                this.awaiter = Some(Arc::clone(&awaiter));

                let waiter: Arc<dyn Waiter<T>> = Arc::clone(&awaiter) as _;
                match source.add_waiter(&waiter) {
                    Ok(None) => {}
                    Ok(Some(outcome)) => {
                        awaiter.done.store(true, Ordering::Release);
                        return Poll::Ready(outcome.into_result());
                    }
                    Err(error) => misuse(error),
                }
                awaiter
            }
        };

        awaiter.waker.register(cx.waker());
        if !awaiter.is_done() {
            return Poll::Pending;
        }
        let outcome = awaiter.outcome.lock().take();
        match outcome {
            Some(outcome) => Poll::Ready(outcome.into_result()),
            None => panic!("`Promise` polled after completion"),
        }
    }
}
