#[cfg(feature = "progress")]
use super::Combine;
use super::{FanIn, Pick, Quorum};
use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore};
use crate::pool::{self, Poolable};
use crate::Outcome;
use std::marker::PhantomData;
use std::sync::Arc;

/// Settles with the first report, whatever it is.
pub(crate) struct RaceNode<T, P: Pick<T>> {
    core: NodeCore<P::Output>,
    quorum: Quorum,
    _input: PhantomData<fn(T)>,
}

impl<T: Send + 'static, P: Pick<T>> RaceNode<T, P> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            quorum: Quorum::new(),
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
}

impl<T: Send + 'static, P: Pick<T>> FanIn for RaceNode<T, P> {
    type Input = T;

    #[cfg(feature = "progress")]
    const COMBINE: Combine = Combine::Max;

    fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    fn report(self: &Arc<Self>, index: usize, outcome: Outcome<T>) {
        let outcome = outcome.map(|value| P::pick(index, value));
        if let Err(lost) = completion::complete(Arc::clone(self), outcome) {
            tracing::trace!(index, "race already decided");
            lost.discard();
        }
        self.quorum.arrive();
    }
}

impl<T: Send + 'static, P: Pick<T>> Node for RaceNode<T, P> {
    type Output = P::Output;

    fn core(&self) -> &NodeCore<P::Output> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static, P: Pick<T>> Propagate for RaceNode<T, P> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static, P: Pick<T>> Poolable for RaceNode<T, P> {
    fn reset(&self) {
        self.quorum.reset();
        self.core.reset();
    }
}
