use mycelium_bitfield::bitfield;
use std::sync::atomic::{AtomicU64, Ordering};

bitfield! {
    /// A snapshot of a node's lifetime word.
    ///
    /// ```text
    /// | 63       48 | 47        32 | 31     0 |
    /// | (unused)    | generation   | retains  |
    /// ```
    ///
    /// Retiring a node clears its retains and bumps its generation with a
    /// single store, so nobody can observe a recycled node on its old
    /// generation.
    #[derive(Eq, PartialEq)]
    pub(crate) struct Lifetime<u64> {
        /// Parties that still need the node before it may be repooled.
        pub(crate) const RETAINS = 32;
        /// Bumped every time the node is repooled. Only the low 16 bits are
        /// used; handles carry a `u16`.
        pub(crate) const GENERATION = ..;
    }
}

const RETAIN_ONE: u64 = Lifetime::RETAINS.first_bit();
const RETAIN_MAX: u64 = u32::MAX as u64;

pub(crate) struct LifetimeCell(AtomicU64);

impl LifetimeCell {
    /// An idle cell: generation zero, no retains.
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn load(&self, ordering: Ordering) -> Lifetime {
        Lifetime::from_bits(self.0.load(ordering))
    }

    pub(crate) fn generation(&self) -> u16 {
        self.load(Ordering::Acquire).get(Lifetime::GENERATION) as u16
    }

    #[cfg(test)]
    pub(crate) fn retains(&self) -> u64 {
        self.load(Ordering::Acquire).get(Lifetime::RETAINS)
    }

    /// Idle nodes are either fresh or sitting in a free list.
    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.retains() == 0
    }

    /// Puts a node taken from the pool back into service with one retain.
    /// The caller must own the node exclusively.
    pub(crate) fn revive(&self) -> u16 {
        let current = self.load(Ordering::Acquire);
        debug_assert_eq!(current.get(Lifetime::RETAINS), 0, "revived a live node");
        self.0
            .store(current.with(Lifetime::RETAINS, 1).0, Ordering::Release);
        current.get(Lifetime::GENERATION) as u16
    }

    pub(crate) fn retain(&self) {
        let prev = Lifetime::from_bits(self.0.fetch_add(RETAIN_ONE, Ordering::Relaxed));
        debug_assert!(prev.get(Lifetime::RETAINS) > 0, "retained an idle node");
        debug_assert!(prev.get(Lifetime::RETAINS) < RETAIN_MAX, "retain count overflow");
    }

    /// Returns `true` if this dropped the last retain.
    pub(crate) fn release(&self) -> bool {
        let prev = Lifetime::from_bits(self.0.fetch_sub(RETAIN_ONE, Ordering::AcqRel));
        debug_assert!(prev.get(Lifetime::RETAINS) > 0, "released an idle node");
        prev.get(Lifetime::RETAINS) == 1
    }

    /// Moves an unretained node to the next generation.
    pub(crate) fn retire(&self) {
        let current = self.load(Ordering::Acquire);
        let generation = (current.get(Lifetime::GENERATION) + 1) & u64::from(u16::MAX);
        let next = Lifetime::new()
            .with(Lifetime::GENERATION, generation)
            .with(Lifetime::RETAINS, 0);
        self.0.store(next.0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_reports_the_last_retain() {
        let cell = LifetimeCell::new();
        assert!(cell.is_idle());
        assert_eq!(cell.revive(), 0);
        cell.retain();
        assert!(!cell.release());
        assert!(cell.release());
        assert!(cell.is_idle());
    }

    #[test]
    fn retains_go_past_sixteen_bits() {
        let cell = LifetimeCell::new();
        let generation = cell.revive();
        for _ in 0..70_000 {
            cell.retain();
        }
        assert_eq!(cell.retains(), 70_001);
        assert_eq!(cell.generation(), generation);
        for _ in 0..70_000 {
            assert!(!cell.release());
        }
        assert!(cell.release());
        assert_eq!(cell.generation(), generation);
    }

    #[test]
    fn retire_bumps_the_generation_and_wraps() {
        let cell = LifetimeCell::new();
        cell.revive();
        assert!(cell.release());
        cell.retire();
        assert_eq!(cell.generation(), 1);

        for _ in 0..u16::MAX {
            cell.retire();
        }
        assert_eq!(cell.generation(), 0);
        assert_eq!(cell.retains(), 0);
    }
}
