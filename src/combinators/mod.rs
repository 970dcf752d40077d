//! Fan-in combinators.
//!
//! A combinator node waits on its inputs through [`PassThrough`] links, one
//! per input. It holds one retain for its consumer and one per link; each
//! link reports its input's outcome and then releases the owner, so the
//! node is only recycled once every input has been accounted for, however
//! early it settled.
//!
//! ```
//! use pooled_promise::{combinators, Promise};
//! use futures::executor::block_on;
//!
//! let all = combinators::merge([Promise::resolved(1), Promise::resolved(2)]);
//! assert_eq!(block_on(all).unwrap(), vec![1, 2]);
//!
//! let any = combinators::race([Promise::resolved("fast"), Promise::canceled()]);
//! assert_eq!(block_on(any).unwrap(), "fast");
//! ```

mod first;
mod merge;
mod pass_through;
mod race;
mod settled;

use crate::error::UsageError;
use crate::node::completion::Propagate;
use crate::node::{self, Node};
#[cfg(feature = "progress")]
use crate::progress::{self, Hop};
#[cfg(feature = "progress")]
use crate::State;
use crate::{Outcome, Promise, Rejection};
use first::FirstNode;
use merge::MergeNode;
#[cfg(feature = "progress")]
use parking_lot::Mutex;
use pass_through::PassThrough;
use race::RaceNode;
use settled::SettledNode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A node fed by pass-through links.
pub(crate) trait FanIn: Node + Propagate {
    type Input: Send + 'static;

    fn quorum(&self) -> &Quorum;

    /// Receives input `index`'s outcome. Called exactly once per input.
    fn report(self: &Arc<Self>, index: usize, outcome: Outcome<Self::Input>);

    #[cfg(feature = "progress")]
    const COMBINE: Combine;

    /// Receives input `index`'s progress, already normalized to `[0, 1]`.
    #[cfg(feature = "progress")]
    fn report_progress(&self, index: usize, fraction: f64) -> Option<Hop> {
        if self.core().state() != State::Pending {
            return None;
        }
        let combined = self.quorum().record(index, fraction, Self::COMBINE);
        // a combinator stands for the whole of its deepest input
        let position = combined * (f64::from(self.core().depth()) + 1.0);
        progress::next_hop(self.core(), position)
    }
}

/// How the inputs' progress adds up.
#[cfg(feature = "progress")]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Combine {
    /// Every input must finish.
    Mean,
    /// Any input may finish.
    Max,
}

/// Countdown and progress bookkeeping shared by every combinator.
pub(crate) struct Quorum {
    remaining: AtomicUsize,
    #[cfg(feature = "progress")]
    fractions: Mutex<Vec<f64>>,
}

impl Quorum {
    pub(crate) fn new() -> Self {
        Self {
            remaining: AtomicUsize::new(0),
            #[cfg(feature = "progress")]
            fractions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn arm(&self, inputs: usize) {
        self.remaining.store(inputs, Ordering::Release);
        #[cfg(feature = "progress")]
        self.fractions.lock().resize(inputs, 0.0);
    }

    /// Counts one input in. Returns `true` for the last one.
    pub(crate) fn arrive(&self) -> bool {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "more reports than inputs");
        prev == 1
    }

    #[cfg(feature = "progress")]
    fn record(&self, index: usize, fraction: f64, combine: Combine) -> f64 {
        let mut fractions = self.fractions.lock();
        if let Some(slot) = fractions.get_mut(index) {
            *slot = slot.max(fraction);
        }
        match combine {
            Combine::Mean => fractions.iter().sum::<f64>() / fractions.len().max(1) as f64,
            Combine::Max => fractions.iter().copied().fold(0.0, f64::max),
        }
    }

    pub(crate) fn reset(&self) {
        self.remaining.store(0, Ordering::Relaxed);
        #[cfg(feature = "progress")]
        self.fractions.lock().clear();
    }
}

/// Shapes a winning value.
pub(crate) trait Pick<T>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn pick(index: usize, value: T) -> Self::Output;
}

/// Just the value.
pub(crate) struct Value;

impl<T: Send + 'static> Pick<T> for Value {
    type Output = T;

    fn pick(_: usize, value: T) -> T {
        value
    }
}

/// The value and the index of the input that produced it.
pub(crate) struct Indexed;

impl<T: Send + 'static> Pick<T> for Indexed {
    type Output = (usize, T);

    fn pick(index: usize, value: T) -> (usize, T) {
        (index, value)
    }
}

fn deepest<T: Send + 'static>(inputs: &[Promise<T>]) -> u16 {
    inputs
        .iter()
        .filter_map(|input| input.node.as_ref())
        .map(|node| node.core().depth())
        .max()
        .unwrap_or(0)
}

/// Links every input to `node` and hands out its consumer side.
fn fan_in<C: FanIn>(node: Arc<C>, inputs: Vec<Promise<C::Input>>) -> Promise<C::Output> {
    let promise = Promise::from_node(Arc::clone(&node));
    for _ in 0..inputs.len() {
        node.core().retain();
    }

    for (index, input) in inputs.into_iter().enumerate() {
        let Some(source) = input.into_node() else {
            node.report(index, Outcome::Rejected(Rejection::new(UsageError::DoubleAwait)));
            node::release(&node);
            continue;
        };
        let link = PassThrough::take(Arc::clone(&node), index, source.core().depth());
        if let Err(error) = node::hookup(source, link) {
            node.report(index, Outcome::Rejected(Rejection::new(error)));
            node::release(&node);
        }
    }
    promise
}

/// Resolves with every value, in input order, once all inputs resolve.
/// Settles with the first rejection or cancelation otherwise.
pub fn merge<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<_> = promises.into_iter().collect();
    if inputs.is_empty() {
        return Promise::resolved(Vec::new());
    }
    let node = MergeNode::take(inputs.len(), deepest(&inputs));
    fan_in(node, inputs)
}

/// Settles like whichever input settles first.
pub fn race<T, I>(promises: I) -> Promise<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    race_by::<T, Value, I>(promises)
}

/// Like [`race`], also reporting which input won.
pub fn race_with_index<T, I>(promises: I) -> Promise<(usize, T)>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    race_by::<T, Indexed, I>(promises)
}

fn race_by<T, P, I>(promises: I) -> Promise<P::Output>
where
    T: Send + 'static,
    P: Pick<T>,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<_> = promises.into_iter().collect();
    if inputs.is_empty() {
        return Promise::rejected(UsageError::EmptyCombinator);
    }
    let node = RaceNode::<T, P>::take(inputs.len(), deepest(&inputs));
    fan_in(node, inputs)
}

/// Resolves with the first value to arrive. Only if every input fails does
/// it settle, with the last failure to arrive.
pub fn first<T, I>(promises: I) -> Promise<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    first_by::<T, Value, I>(promises)
}

/// Like [`first`], also reporting which input resolved.
pub fn first_with_index<T, I>(promises: I) -> Promise<(usize, T)>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    first_by::<T, Indexed, I>(promises)
}

fn first_by<T, P, I>(promises: I) -> Promise<P::Output>
where
    T: Send + 'static,
    P: Pick<T>,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<_> = promises.into_iter().collect();
    if inputs.is_empty() {
        return Promise::rejected(UsageError::EmptyCombinator);
    }
    let node = FirstNode::<T, P>::take(inputs.len(), deepest(&inputs));
    fan_in(node, inputs)
}

/// Resolves with every input's outcome, in input order, once all have
/// settled. Never rejects; rejections it collects count as handled.
pub fn all_settled<T, I>(promises: I) -> Promise<Vec<Outcome<T>>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<_> = promises.into_iter().collect();
    if inputs.is_empty() {
        return Promise::resolved(Vec::new());
    }
    let node = SettledNode::take(inputs.len(), deepest(&inputs));
    fan_in(node, inputs)
}

#[cfg(all(test, feature = "progress"))]
mod tests {
    use super::*;

    #[test]
    fn mean_and_max_never_go_backwards() {
        let quorum = Quorum::new();
        quorum.arm(2);
        assert_eq!(quorum.record(0, 0.5, Combine::Mean), 0.25);
        assert_eq!(quorum.record(1, 1.0, Combine::Mean), 0.75);
        assert_eq!(quorum.record(0, 0.2, Combine::Mean), 0.75);
        assert_eq!(quorum.record(0, 0.2, Combine::Max), 1.0);
        assert!(!quorum.arrive());
        assert!(quorum.arrive());
    }
}
