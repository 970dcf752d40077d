#[cfg(feature = "progress")]
use super::Combine;
use super::{FanIn, Pick, Quorum};
use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore};
use crate::pool::{self, Poolable};
use crate::Outcome;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// Settles with the first value; falls back to a failure only once every
/// input has failed.
pub(crate) struct FirstNode<T, P: Pick<T>> {
    core: NodeCore<P::Output>,
    quorum: Quorum,
    /// The latest failure, used if nothing resolves.
    failure: Mutex<Option<Outcome<P::Output>>>,
    _input: PhantomData<fn(T)>,
}

impl<T: Send + 'static, P: Pick<T>> FirstNode<T, P> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            quorum: Quorum::new(),
            failure: Mutex::new(None),
            _input: PhantomData,
        }
    }

    pub(crate) fn take(inputs: usize, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        node.quorum.arm(inputs);
        node
    }

    fn settle(self: &Arc<Self>, outcome: Outcome<P::Output>) {
        if let Err(lost) = completion::complete(Arc::clone(self), outcome) {
            lost.discard();
        }
    }
}

impl<T: Send + 'static, P: Pick<T>> FanIn for FirstNode<T, P> {
    type Input = T;

    #[cfg(feature = "progress")]
    const COMBINE: Combine = Combine::Max;

    fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    fn report(self: &Arc<Self>, index: usize, outcome: Outcome<T>) {
        match outcome.forward() {
            Ok(value) => self.settle(Outcome::Resolved(P::pick(index, value))),
            Err(failure) => {
                // tolerated unless every input fails
                if let Outcome::Rejected(rejection) = &failure {
                    rejection.mark_handled();
                }
                *self.failure.lock() = Some(failure);
            }
        }

        if self.quorum.arrive() {
            let failure = self.failure.lock().take();
            let failure = match failure {
                Some(Outcome::Rejected(rejection)) => Outcome::Rejected(rejection.rethrow()),
                Some(failure) => failure,
                None => return,
            };
            // loses the claim if any input resolved
            if completion::complete(Arc::clone(self), failure).is_err() {
                tracing::trace!("first resolved before every input failed");
            }
        }
    }
}

impl<T: Send + 'static, P: Pick<T>> Node for FirstNode<T, P> {
    type Output = P::Output;

    fn core(&self) -> &NodeCore<P::Output> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static, P: Pick<T>> Propagate for FirstNode<T, P> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static, P: Pick<T>> Poolable for FirstNode<T, P> {
    fn reset(&self) {
        self.failure.lock().take();
        self.quorum.reset();
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use crate::combinators::{first, first_with_index};
    use crate::node::Node;
    use crate::{Deferred, Failure, Promise};
    use futures::executor::block_on;

    #[test]
    fn failures_are_skipped_while_a_value_may_come() {
        let (deferred, pending) = Deferred::<u8>::new();
        let winner = first_with_index([Promise::canceled(), Promise::rejected("no"), pending]);
        assert_eq!(winner.is_completed(), Ok(false));
        deferred.resolve(5).unwrap();
        assert_eq!(block_on(winner).unwrap(), (2, 5));
    }

    #[test]
    fn last_failure_is_used_when_nothing_resolves() {
        let (deferred, pending) = Deferred::<u8>::new();
        let winner = first([Promise::rejected("early"), pending]);
        deferred.cancel().unwrap();
        assert!(matches!(block_on(winner), Err(Failure::Canceled)));
    }

    #[test]
    fn late_reports_are_drained_before_recycling() {
        let (a, first_input) = Deferred::<i64>::new();
        let (b, second) = Deferred::<i64>::new();
        let (c, third) = Deferred::<i64>::new();
        let winner = first([first_input, second, third]);
        let node = winner.node.clone().expect("fresh promise has a node");

        c.resolve(5).unwrap();
        assert_eq!(block_on(winner).unwrap(), 5);
        a.cancel().unwrap();
        assert!(!node.core().is_idle());

        b.reject("err").unwrap();
        assert!(node.core().is_idle());
    }
}
