//! Lock-free counters for the memory engine, and the snapshot type handed
//! back to callers.
//!
//! `total_count`/`total_cost` mirror the aggregates [`crate::linked_map::LinkedMap`]
//! already tracks, but as cache-aligned atomics so `MemoryEngine::stats()`
//! never has to take the structural mutex just to report a number.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct CacheAlignedAtomicU64(AtomicU64);

#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct CacheAlignedAtomicUsize(AtomicUsize);

impl CacheAlignedAtomicU64 {
    #[inline]
    pub(crate) fn load(&self, ordering: Ordering) -> u64 {
        self.0.load(ordering)
    }

    #[inline]
    pub(crate) fn store(&self, value: u64, ordering: Ordering) {
        self.0.store(value, ordering);
    }
}

impl CacheAlignedAtomicUsize {
    #[inline]
    pub(crate) fn load(&self, ordering: Ordering) -> usize {
        self.0.load(ordering)
    }

    #[inline]
    pub(crate) fn store(&self, value: usize, ordering: Ordering) {
        self.0.store(value, ordering);
    }
}

/// Lock-free mirror of a [`crate::linked_map::LinkedMap`]'s aggregates,
/// refreshed by [`crate::memory_engine::MemoryEngine`] after every
/// structural mutation, under the same critical section.
#[derive(Debug, Default)]
pub(crate) struct MemoryEngineMetrics {
    count: CacheAlignedAtomicUsize,
    cost: CacheAlignedAtomicU64,
}

impl MemoryEngineMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, count: usize, cost: u64) {
        self.count.store(count, Ordering::Relaxed);
        self.cost.store(cost, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MemoryEngineStats {
        MemoryEngineStats {
            total_count: self.count.load(Ordering::Relaxed),
            total_cost: self.cost.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for a [`crate::memory_engine::MemoryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEngineStats {
    pub total_count: usize,
    pub total_cost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_reflect_last_set_call() {
        let metrics = MemoryEngineMetrics::new();
        metrics.set(3, 42);
        let snap = metrics.snapshot();
        assert_eq!(snap.total_count, 3);
        assert_eq!(snap.total_cost, 42);
    }
}
