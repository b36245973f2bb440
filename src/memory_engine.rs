//! Thread-safe LRU cache over [`crate::linked_map::LinkedMap`].
//!
//! A single [`parking_lot::Mutex`] guards the list and its index. The lock
//! is held only for structural mutation; values evicted during a mutation
//! are moved into a local `Vec` and released *after* the lock drops,
//! according to [`crate::config::ReleasePolicy`] — so destructor work for a
//! large evicted value never lengthens another thread's critical section.

use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{MemoryEngineConfig, ReleasePolicy};
use crate::linked_map::LinkedMap;
use crate::stats::{MemoryEngineMetrics, MemoryEngineStats};

struct Inner<V> {
    map: LinkedMap<V>,
    metrics: Arc<MemoryEngineMetrics>,
}

impl<V> Inner<V> {
    fn sync_metrics(&self) {
        self.metrics.set(self.map.total_count(), self.map.total_cost());
    }
}

/// Drops values off the caller's thread, or off a dedicated worker thread,
/// per [`ReleasePolicy`]. `MainThread` values are queued for the host to
/// drain with [`MemoryEngine::drain_main_thread_releases`], since this crate
/// has no notion of which thread is "main" on its own.
enum Releaser<V: Send + 'static> {
    Inline,
    Background(mpsc::Sender<V>),
    MainThread(Arc<Mutex<VecDeque<V>>>),
}

impl<V: Send + 'static> Releaser<V> {
    fn new(policy: ReleasePolicy) -> Self {
        match policy {
            ReleasePolicy::Inline => Self::Inline,
            ReleasePolicy::Background => {
                let (tx, rx) = mpsc::channel::<V>();
                let spawned = thread::Builder::new()
                    .name("duocache-memory-release".into())
                    .spawn(move || {
                        for value in rx {
                            drop(value);
                        }
                    })
                    .is_ok();
                if spawned {
                    Self::Background(tx)
                } else {
                    tracing::warn!("failed to spawn background release worker, falling back to inline release");
                    Self::Inline
                }
            }
            ReleasePolicy::MainThread => Self::MainThread(Arc::new(Mutex::new(VecDeque::new()))),
        }
    }

    fn release_all(&self, values: Vec<V>) {
        match self {
            Self::Inline => drop(values),
            Self::Background(tx) => {
                for value in values {
                    let _ = tx.send(value);
                }
            }
            Self::MainThread(queue) => {
                queue.lock().extend(values);
            }
        }
    }
}

/// A thread-safe, capacity-bounded LRU cache for arbitrary values.
pub struct MemoryEngine<V: Send + 'static> {
    inner: Arc<Mutex<Inner<V>>>,
    metrics: Arc<MemoryEngineMetrics>,
    releaser: Arc<Releaser<V>>,
    config: MemoryEngineConfig,
    auto_trim: Option<tokio::task::JoinHandle<()>>,
}

impl<V: Send + 'static> MemoryEngine<V> {
    /// Builds an engine and, when called from inside a tokio runtime, spawns
    /// the periodic `trim_to_count`/`trim_to_cost`/`trim_to_age` worker
    /// Outside a runtime, auto-trim is simply not started; callers
    /// can still drive the trim methods manually.
    pub fn new(config: MemoryEngineConfig) -> Self {
        let metrics = Arc::new(MemoryEngineMetrics::new());
        let inner = Arc::new(Mutex::new(Inner {
            map: LinkedMap::new(),
            metrics: Arc::clone(&metrics),
        }));
        let releaser = Arc::new(Releaser::new(config.release_policy));

        let auto_trim = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let inner = Arc::clone(&inner);
            let releaser = Arc::clone(&releaser);
            let config = config.clone();
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(config.auto_trim_interval);
                loop {
                    ticker.tick().await;
                    run_auto_trim(&inner, &releaser, &config);
                }
            })
        });

        Self {
            inner,
            metrics,
            releaser,
            config,
            auto_trim,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().map.get_handle(key).is_some()
    }

    /// Returns the value for `key`, refreshing its timestamp and moving it
    /// to head (most-recently-used) on a hit.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        let handle = inner.map.get_handle(key)?;
        inner.map.move_to_head(handle, Instant::now(), None);
        let value = inner.map.value(handle).clone();
        Some(value)
    }

    /// Inserts or updates `key`. On update, replaces the value and adjusts
    /// the cost aggregate by the delta; either way the node moves to head.
    /// If the new aggregate exceeds a configured limit, trims from the tail
    /// before releasing the lock.
    pub fn set(&self, key: &str, value: V, cost: u64) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            match inner.map.get_handle(key) {
                Some(handle) => {
                    *inner.map.value_mut(handle) = value;
                    inner.map.move_to_head(handle, Instant::now(), Some(cost));
                }
                None => {
                    inner.map.insert_at_head(key.to_string(), value, cost, Instant::now());
                }
            }
            evict_over_limits(&mut inner.map, &self.config, &mut evicted);
            inner.sync_metrics();
        }
        self.releaser.release_all(evicted);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let handle = inner.map.get_handle(key)?;
        let value = inner.map.remove(handle);
        inner.sync_metrics();
        Some(value)
    }

    pub fn remove_all(&self) {
        let values = {
            let mut inner = self.inner.lock();
            let values = inner.map.remove_all();
            inner.sync_metrics();
            values
        };
        self.releaser.release_all(values);
    }

    pub fn stats(&self) -> MemoryEngineStats {
        self.metrics.snapshot()
    }

    /// Evicts from the tail until `total_count <= max`.
    pub fn trim_to_count(&self, max: usize) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            while inner.map.total_count() > max {
                let Some((_, value)) = inner.map.remove_tail() else {
                    break;
                };
                evicted.push(value);
            }
            inner.sync_metrics();
        }
        self.releaser.release_all(evicted);
    }

    /// Evicts from the tail until `total_cost <= max`.
    pub fn trim_to_cost(&self, max: u64) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            while inner.map.total_cost() > max {
                let Some((_, value)) = inner.map.remove_tail() else {
                    break;
                };
                evicted.push(value);
            }
            inner.sync_metrics();
        }
        self.releaser.release_all(evicted);
    }

    /// Evicts tail nodes older than `max_age`. Since only the tail's
    /// neighbor ordering is by recency (not strictly by age for nodes
    /// touched out of insertion order), this walks from the tail until it
    /// finds a node within budget and stops (matching the documented "trim from the
    /// tail" description: nodes closer to the tail are older or equal).
    pub fn trim_to_age(&self, max_age: Duration) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            loop {
                let Some(tail_key) = inner.map.tail_key().map(str::to_string) else {
                    break;
                };
                let Some(handle) = inner.map.get_handle(&tail_key) else {
                    break;
                };
                if inner.map.time(handle).elapsed() <= max_age {
                    break;
                }
                evicted.push(inner.map.remove(handle));
            }
            inner.sync_metrics();
        }
        self.releaser.release_all(evicted);
    }

    /// Invoked by host glue on a memory-pressure notification (platform
    /// callbacks are not generated by the core).
    pub fn on_memory_pressure(&self) {
        if self.config.should_remove_all_on_memory_warning {
            self.remove_all();
        }
    }

    /// Invoked by host glue when the application enters the background.
    pub fn on_enter_background(&self) {
        if self.config.should_remove_all_on_enter_background {
            self.remove_all();
        }
    }

    /// Drains values queued for release by [`ReleasePolicy::MainThread`].
    /// A no-op (returns empty) under any other release policy.
    pub fn drain_main_thread_releases(&self) -> Vec<V> {
        match self.releaser.as_ref() {
            Releaser::MainThread(queue) => queue.lock().drain(..).collect(),
            _ => Vec::new(),
        }
    }
}

fn evict_over_limits<V>(map: &mut LinkedMap<V>, config: &MemoryEngineConfig, evicted: &mut Vec<V>) {
    if let Some(limit) = config.count_limit {
        while map.total_count() > limit {
            let Some((_, value)) = map.remove_tail() else { break };
            evicted.push(value);
        }
    }
    if let Some(limit) = config.cost_limit {
        while map.total_cost() > limit {
            let Some((_, value)) = map.remove_tail() else { break };
            evicted.push(value);
        }
    }
}

fn run_auto_trim<V: Send + 'static>(
    inner: &Arc<Mutex<Inner<V>>>,
    releaser: &Arc<Releaser<V>>,
    config: &MemoryEngineConfig,
) {
    let mut evicted = Vec::new();
    {
        let mut inner = inner.lock();
        if let Some(limit) = config.count_limit {
            while inner.map.total_count() > limit {
                let Some((_, value)) = inner.map.remove_tail() else { break };
                evicted.push(value);
            }
        }
        if let Some(limit) = config.cost_limit {
            while inner.map.total_cost() > limit {
                let Some((_, value)) = inner.map.remove_tail() else { break };
                evicted.push(value);
            }
        }
        if let Some(max_age) = config.age_limit {
            loop {
                let Some(tail_key) = inner.map.tail_key().map(str::to_string) else {
                    break;
                };
                let Some(handle) = inner.map.get_handle(&tail_key) else {
                    break;
                };
                if inner.map.time(handle).elapsed() <= max_age {
                    break;
                }
                evicted.push(inner.map.remove(handle));
            }
        }
        inner.sync_metrics();
    }
    releaser.release_all(evicted);
}

impl<V: Send + 'static> Drop for MemoryEngine<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_trim.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: MemoryEngineConfig) -> MemoryEngine<i32> {
        MemoryEngine::new(config)
    }

    #[test]
    fn set_and_get_roundtrip() {
        let e = engine(MemoryEngineConfig::new());
        e.set("a", 1, 1);
        assert_eq!(e.get("a"), Some(1));
        assert!(e.contains("a"));
    }

    #[test]
    fn set_updates_existing_key_and_cost_delta() {
        let e = engine(MemoryEngineConfig::new());
        e.set("a", 1, 10);
        e.set("a", 2, 20);
        assert_eq!(e.get("a"), Some(2));
        assert_eq!(e.stats().total_count, 1);
        assert_eq!(e.stats().total_cost, 20);
    }

    #[test]
    fn count_limit_evicts_lru_on_set() {
        let e = engine(MemoryEngineConfig::new().with_count_limit(3));
        e.set("a", 1, 1);
        e.set("b", 2, 1);
        e.set("c", 3, 1);
        e.set("d", 4, 1);

        assert!(!e.contains("a"));
        assert!(e.get("b").is_some());
        e.set("e", 5, 1);
        assert!(!e.contains("c"));
        assert!(e.contains("b"));
        assert!(e.contains("d"));
        assert!(e.contains("e"));
    }

    #[test]
    fn remove_all_empties_and_resets_aggregates() {
        let e = engine(MemoryEngineConfig::new());
        e.set("a", 1, 5);
        e.set("b", 2, 5);
        e.remove_all();
        assert_eq!(e.stats().total_count, 0);
        assert_eq!(e.stats().total_cost, 0);
    }

    #[test]
    fn trim_to_count_respects_budget() {
        let e = engine(MemoryEngineConfig::new());
        for i in 0..10 {
            e.set(&format!("k{i}"), i, 1);
        }
        e.trim_to_count(4);
        assert_eq!(e.stats().total_count, 4);
    }

    #[test]
    fn trim_to_cost_respects_budget() {
        let e = engine(MemoryEngineConfig::new());
        for i in 0..10 {
            e.set(&format!("k{i}"), i, 10);
        }
        e.trim_to_cost(35);
        assert!(e.stats().total_cost <= 35);
    }

    #[test]
    fn on_memory_pressure_clears_when_configured() {
        let e = engine(MemoryEngineConfig::new());
        e.set("a", 1, 1);
        e.on_memory_pressure();
        assert_eq!(e.stats().total_count, 0);
    }

    #[test]
    fn main_thread_release_policy_queues_values() {
        let e = engine(MemoryEngineConfig::new().with_release_policy(ReleasePolicy::MainThread));
        e.set("a", 1, 1);
        e.remove("a");
        let drained = e.drain_main_thread_releases();
        assert_eq!(drained, vec![1]);
    }

    #[tokio::test]
    async fn concurrent_access_preserves_aggregate_invariant() {
        let e = Arc::new(engine(MemoryEngineConfig::new()));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let e = Arc::clone(&e);
            handles.push(tokio::task::spawn_blocking(move || {
                for i in 0..1000 {
                    let key = format!("k{}-{}", worker, i % 50);
                    match i % 3 {
                        0 => e.set(&key, i, 1),
                        1 => {
                            e.get(&key);
                        }
                        _ => {
                            e.remove(&key);
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let stats = e.stats();
        assert!(stats.total_count as u64 == stats.total_cost);
    }
}
