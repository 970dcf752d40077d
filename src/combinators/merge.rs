#[cfg(feature = "progress")]
use super::Combine;
use super::{FanIn, Quorum};
use crate::node::completion::{self, Propagate};
use crate::node::{Node, NodeCore};
use crate::pool::{self, Poolable};
use crate::Outcome;
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) struct MergeNode<T> {
    core: NodeCore<Vec<T>>,
    values: Mutex<Vec<Option<T>>>,
    quorum: Quorum,
}

impl<T: Send + 'static> MergeNode<T> {
    fn new() -> Self {
        Self {
            core: NodeCore::new(),
            values: Mutex::new(Vec::new()),
            quorum: Quorum::new(),
        }
    }

    pub(crate) fn take(inputs: usize, depth: u16) -> Arc<Self> {
        let node = pool::take_or_else(Self::new);
        node.core.revive();
        node.core.set_depth(depth);
        node.values.lock().resize_with(inputs, || None);
        node.quorum.arm(inputs);
        node
    }

    fn settle(self: &Arc<Self>, outcome: Outcome<Vec<T>>) {
        if let Err(lost) = completion::complete(Arc::clone(self), outcome) {
            lost.discard();
        }
    }
}

impl<T: Send + 'static> FanIn for MergeNode<T> {
    type Input = T;

    #[cfg(feature = "progress")]
    const COMBINE: Combine = Combine::Mean;

    fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    fn report(self: &Arc<Self>, index: usize, outcome: Outcome<T>) {
        match outcome.forward() {
            Ok(value) => {
                if let Some(slot) = self.values.lock().get_mut(index) {
                    *slot = Some(value);
                }
            }
            // the first failure wins; later inputs still report in
            Err(failure) => self.settle(failure),
        }

        if self.quorum.arrive() {
            let values: Option<Vec<T>> = std::mem::take(&mut *self.values.lock())
                .into_iter()
                .collect();
            if let Some(values) = values {
                self.settle(Outcome::Resolved(values));
            }
        }
    }
}

impl<T: Send + 'static> Node for MergeNode<T> {
    type Output = Vec<T>;

    fn core(&self) -> &NodeCore<Vec<T>> {
        &self.core
    }

    fn dispose(self: Arc<Self>) {
        pool::repool(self);
    }
}

impl<T: Send + 'static> Propagate for MergeNode<T> {
    fn propagate(self: Arc<Self>) {
        completion::propagate_single(self);
    }
}

impl<T: Send + 'static> Poolable for MergeNode<T> {
    fn reset(&self) {
        self.values.lock().clear();
        self.quorum.reset();
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use crate::combinators::merge;
    use crate::node::Node;
    use crate::{Deferred, Failure, Promise};
    use futures::executor::block_on;

    #[test]
    fn values_come_back_in_input_order() {
        let (late, promise) = Deferred::<u8>::new();
        let all = merge([promise, Promise::resolved(2), Promise::resolved(3)]);
        assert_eq!(all.is_completed(), Ok(false));
        late.resolve(1).unwrap();
        assert_eq!(block_on(all).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn first_failure_settles_before_the_rest() {
        let (pending, promise) = Deferred::<u8>::new();
        let all = merge([Promise::canceled(), promise]);
        assert_eq!(all.is_completed(), Ok(true));
        assert!(matches!(block_on(all), Err(Failure::Canceled)));
        pending.resolve(1).unwrap();
    }

    #[test]
    fn empty_merge_resolves_empty() {
        assert!(block_on(merge(Vec::<Promise<u8>>::new())).unwrap().is_empty());
    }

    #[test]
    fn rejection_settles_but_the_node_waits_for_every_input() {
        let (a, first) = Deferred::<i64>::new();
        let (b, second) = Deferred::<i64>::new();
        let (c, third) = Deferred::<i64>::new();
        let all = merge([first, second, third]);
        let node = all.node.clone().expect("fresh promise has a node");

        a.resolve(10).unwrap();
        b.reject("err").unwrap();
        let failure = block_on(all).unwrap_err();
        assert_eq!(failure.rejection().and_then(|r| r.reason::<&str>()), Some(&"err"));
        assert!(!node.core().is_idle());

        c.cancel().unwrap();
        assert!(node.core().is_idle());
    }
}
