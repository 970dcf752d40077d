//! Per-type free lists for node recycling.
//!
//! Every concrete node type gets its own lock-free free list so a recycled
//! node is always reused with the exact same layout. Nodes are reset when
//! they are handed back, not when they are taken, so a pooled node never
//! keeps a callback or payload alive.

use crate::config;
use crossbeam::queue::{ArrayQueue, SegQueue};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Something that can live in a free list.
pub(crate) trait Poolable: Send + Sync + Sized + 'static {
    /// Clears every field that could reference the previous use.
    fn reset(&self);
}

enum FreeList<N> {
    Bounded(ArrayQueue<Arc<N>>),
    Unbounded(SegQueue<Arc<N>>),
}

impl<N> FreeList<N> {
    fn pop(&self) -> Option<Arc<N>> {
        match self {
            FreeList::Bounded(queue) => queue.pop(),
            FreeList::Unbounded(queue) => queue.pop(),
        }
    }

    fn push(&self, item: Arc<N>) -> Result<(), Arc<N>> {
        match self {
            FreeList::Bounded(queue) => queue.push(item),
            FreeList::Unbounded(queue) => {
                queue.push(item);
                Ok(())
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            FreeList::Bounded(queue) => queue.len(),
            FreeList::Unbounded(queue) => queue.len(),
        }
    }

    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

trait Clear: Send + Sync {
    fn clear(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<N: Poolable> Clear for FreeList<N> {
    fn clear(&self) {
        FreeList::clear(self);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

static POOLS: LazyLock<RwLock<HashMap<TypeId, Arc<dyn Clear>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn free_list<N: Poolable>() -> Option<Arc<FreeList<N>>> {
    if !config::pooling() {
        return None;
    }

    let id = TypeId::of::<N>();
    let existing = POOLS.read().get(&id).cloned();
    let list = match existing {
        Some(list) => list,
        None => {
            let mut pools = POOLS.write();
            Arc::clone(pools.entry(id).or_insert_with(|| {
                let list = match config::pool_capacity() {
                    Some(capacity) => FreeList::<N>::Bounded(ArrayQueue::new(capacity.max(1))),
                    None => FreeList::<N>::Unbounded(SegQueue::new()),
                };
                tracing::debug!(node = type_name::<N>(), "created free list");
                let list: Arc<dyn Clear> = Arc::new(list);
                list
            }))
        }
    };
    list.as_any().downcast::<FreeList<N>>().ok()
}

/// Takes a recycled `N`, if one is available.
pub(crate) fn try_take<N: Poolable>() -> Option<Arc<N>> {
    let node = free_list::<N>()?.pop();
    tracing::trace!(node = type_name::<N>(), hit = node.is_some(), "pool take");
    node
}

/// Takes a recycled `N` or allocates a fresh one.
pub(crate) fn take_or_else<N: Poolable>(alloc: impl FnOnce() -> N) -> Arc<N> {
    try_take::<N>().unwrap_or_else(|| Arc::new(alloc()))
}

/// Resets `node` and hands it back to its free list. Surplus nodes are
/// dropped.
pub(crate) fn repool<N: Poolable>(node: Arc<N>) {
    node.reset();
    let Some(list) = free_list::<N>() else {
        return;
    };
    if list.push(node).is_err() {
        tracing::debug!(node = type_name::<N>(), "free list full, dropping node");
    }
}

/// Repools `node` only if this is the last handle to it.
pub(crate) fn repool_unshared<N: Poolable>(node: Arc<N>) {
    if Arc::strong_count(&node) == 1 {
        repool(node);
    }
}

/// Drops every pooled object.
pub fn clear() {
    let pools: Vec<_> = POOLS.read().values().cloned().collect();
    for pool in pools {
        pool.clear();
    }
}

#[cfg(test)]
pub(crate) fn pooled<N: Poolable>() -> usize {
    free_list::<N>().map_or(0, |list| list.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        value: AtomicUsize,
    }

    impl Poolable for Probe {
        fn reset(&self) {
            self.value.store(0, Ordering::Relaxed);
        }
    }

    #[test]
    fn repool_resets_and_reuses() {
        let probe = Arc::new(Probe::default());
        probe.value.store(42, Ordering::Relaxed);
        let ptr = Arc::as_ptr(&probe);

        repool(probe);
        assert_eq!(pooled::<Probe>(), 1);

        let taken = try_take::<Probe>().expect("pooled probe");
        assert_eq!(Arc::as_ptr(&taken), ptr);
        assert_eq!(taken.value.load(Ordering::Relaxed), 0);
        assert!(try_take::<Probe>().is_none());
    }
}
