#[cfg(feature = "progress")]
use super::Combine;
use super::{FanIn, Quorum};
use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore};
use crate::pool::{self, Poolable};
use crate::Outcome;
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) struct SettledNode<T> {
    core: NodeCore<Vec<Outcome<T>>>,
    outcomes: Mutex<Vec<Option<Outcome<T>>>>,
    quorum: Quorum,
}

impl<T: Send + 'static> SettledNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            outcomes: Mutex::new(Vec::new()),
            quorum: Quorum::new(),
        }
    }

    pub(crate) fn take(inputs: usize, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        node.outcomes.lock().resize_with(inputs, || None);
        node.quorum.arm(inputs);
        node
    }
}

impl<T: Send + 'static> FanIn for SettledNode<T> {
    type Input = T;

    #[cfg(feature = "progress")]
    const COMBINE: Combine = Combine::Mean;

    fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    fn report(self: &Arc<Self>, index: usize, outcome: Outcome<T>) {
        if let Outcome::Rejected(rejection) = &outcome {
            rejection.mark_handled();
        }
        if let Some(slot) = self.outcomes.lock().get_mut(index) {
            *slot = Some(outcome);
        }

        if self.quorum.arrive() {
            let outcomes = std::mem::take(&mut *self.outcomes.lock())
                .into_iter()
                .flatten()
                .collect();
            if let Err(lost) = completion::complete(Arc::clone(self), Outcome::Resolved(outcomes)) {
                lost.discard();
            }
        }
    }
}

impl<T: Send + 'static> Node for SettledNode<T> {
    type Output = Vec<Outcome<T>>;

    fn core(&self) -> &NodeCore<Vec<Outcome<T>>> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static> Propagate for SettledNode<T> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static> Poolable for SettledNode<T> {
    fn reset(&self) {
        self.outcomes.lock().clear();
        self.quorum.reset();
        self.core.reset();
    }
}
