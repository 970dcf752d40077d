//! Completion propagation.
//!
//! Handing an outcome to the next waiter never recurses: a node that
//! settles is pushed onto a thread-local queue and the outermost `schedule`
//! call drains it. A chain of any length is walked with constant stack.

use super::waiter::Detached;
use super::{release, Node};
use crate::Outcome;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

/// A settled node, ready to hand its outcome to whoever waits on it.
pub(crate) trait Propagate: Send + Sync {
    fn propagate(self: Arc<Self>);
}

struct Trampoline {
    running: bool,
    queue: VecDeque<Arc<dyn Propagate>>,
}

thread_local! {
    static TRAMPOLINE: RefCell<Trampoline> = const {
        RefCell::new(Trampoline {
            running: false,
            queue: VecDeque::new(),
        })
    };
}

/// Clears the running flag even if a propagate step unwinds. Steps still
/// queued behind a panicking one are dropped, not left for the next drain.
struct Running;

impl Drop for Running {
    fn drop(&mut self) {
        let stranded = TRAMPOLINE.with(|trampoline| {
            let mut trampoline = trampoline.borrow_mut();
            trampoline.running = false;
            std::mem::take(&mut trampoline.queue)
        });
        if !stranded.is_empty() {
            tracing::warn!(count = stranded.len(), "dropping completions queued behind a panic");
        }
    }
}

pub(crate) fn schedule(node: Arc<dyn Propagate>) {
    let drain = TRAMPOLINE.with(|trampoline| {
        let mut trampoline = trampoline.borrow_mut();
        trampoline.queue.push_back(node);
        !std::mem::replace(&mut trampoline.running, true)
    });
    if !drain {
        return;
    }

    let _running = Running;
    // the borrow must end before `propagate` runs, it may schedule more work
    while let Some(next) = TRAMPOLINE.with(|trampoline| trampoline.borrow_mut().queue.pop_front()) {
        next.propagate();
    }
}

/// Settles `node` and schedules it. On a lost race the outcome is handed
/// back untouched.
pub(crate) fn complete<N>(node: Arc<N>, outcome: Outcome<N::Output>) -> Result<(), Outcome<N::Output>>
where
    N: Node + Propagate,
{
    node.core().settle(outcome)?;
    schedule(node);
    Ok(())
}

/// The propagate step of every node with a single consumer.
pub(crate) fn propagate_single<N: Node>(node: Arc<N>) {
    match node.core().waiter.complete() {
        // the attaching side sees `Completed` and delivers inline
        Detached::Unset | Detached::Pending => {}
        Detached::Attached(waiter) => {
            let outcome = node.core().take_outcome();
            release(&node);
            if let Some(outcome) = outcome {
                waiter.handle(outcome);
            }
        }
        Detached::Forgotten => {
            if let Some(outcome) = node.core().take_outcome() {
                outcome.discard();
            }
            release(&node);
        }
    }
}
