//! Crate-level scenarios that exercise both engines end-to-end through the
//! public API, the way a caller actually would — as opposed to the
//! per-module unit tests that poke at internals directly.

use std::sync::Arc;
use std::time::Duration;

use duocache::{DiskEngine, DiskEngineConfig, MemoryEngine, MemoryEngineConfig, StorageType};
use tempfile::tempdir;

#[test]
fn inline_vs_file_routing_under_mixed_storage() {
    let dir = tempdir().unwrap();
    let mut disk = DiskEngine::open(DiskEngineConfig::new(dir.path())).unwrap();

    assert!(disk.save("a", &[0u8; 10], None, None));
    let big = vec![9u8; 30_000];
    assert!(disk.save("b", &big, Some("b.bin"), None));

    let item_a = disk.get_item("a").unwrap();
    assert_eq!(item_a.value.len(), 10);

    let blob_path = disk.data_dir().join("b.bin");
    assert_eq!(std::fs::metadata(&blob_path).unwrap().len(), 30_000);
    let item_b = disk.get_item("b").unwrap();
    assert_eq!(item_b.value.len(), 30_000);
}

#[test]
fn lru_eviction_to_size_keeps_most_recent_half() {
    let dir = tempdir().unwrap();
    let mut disk = DiskEngine::open(DiskEngineConfig::new(dir.path())).unwrap();

    for i in 0..100 {
        assert!(disk.save(&format!("item-{i}"), &[0u8; 1000], None, None));
    }
    assert!(disk.trim_to_size(50_000));

    assert!(disk.size_sum() <= 50_000);
    for i in 50..100 {
        assert!(disk.contains(&format!("item-{i}")), "item-{i} should survive eviction");
    }
    for i in 0..50 {
        assert!(!disk.contains(&format!("item-{i}")), "item-{i} should have been evicted");
    }
}

#[test]
fn fast_remove_all_is_not_proportional_to_item_count() {
    let dir = tempdir().unwrap();
    let mut disk = DiskEngine::open(DiskEngineConfig::new(dir.path())).unwrap();

    for i in 0..500 {
        disk.save(&format!("k{i}"), b"some value bytes", None, None);
    }

    let start = std::time::Instant::now();
    assert!(disk.remove_all());
    let elapsed = start.elapsed();

    assert_eq!(disk.count(), 0);
    assert!(
        elapsed < Duration::from_millis(500),
        "remove_all took {elapsed:?}, expected roughly constant time regardless of item count"
    );
}

#[test]
fn recovers_after_database_file_deleted_out_of_band() {
    let dir = tempdir().unwrap();
    let config = DiskEngineConfig::new(dir.path());

    {
        let mut disk = DiskEngine::open(config.clone()).unwrap();
        disk.save("a", b"will be gone", None, None);
    }

    std::fs::remove_file(config.path.join("manifest.sqlite")).unwrap();

    let mut disk = DiskEngine::open(config).unwrap();
    assert_eq!(disk.count(), 0);
    assert!(disk.get_value("a").is_none());
}

#[test]
fn memory_trim_on_set_evicts_true_lru() {
    let memory = MemoryEngine::<&'static str>::new(MemoryEngineConfig::new().with_count_limit(3));

    memory.set("a", "a-value", 1);
    memory.set("b", "b-value", 1);
    memory.set("c", "c-value", 1);
    memory.set("d", "d-value", 1);

    assert!(!memory.contains("a"));
    assert!(memory.get("b").is_some(), "b should have survived and become MRU");

    memory.set("e", "e-value", 1);
    assert!(!memory.contains("c"), "c should be evicted, not b");
    assert!(memory.contains("b"));
    assert!(memory.contains("d"));
    assert!(memory.contains("e"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_memory_access_preserves_aggregates() {
    let memory = Arc::new(MemoryEngine::<u64>::new(MemoryEngineConfig::new()));
    let mut workers = Vec::new();

    for worker_id in 0..8u64 {
        let memory = Arc::clone(&memory);
        workers.push(tokio::task::spawn_blocking(move || {
            for i in 0..10_000u64 {
                let key = format!("w{worker_id}-{}", i % 100);
                match i % 3 {
                    0 => memory.set(&key, i, 1),
                    1 => {
                        memory.get(&key);
                    }
                    _ => {
                        memory.remove(&key);
                    }
                }
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    let stats = memory.stats();
    assert_eq!(stats.total_count as u64, stats.total_cost);
}

#[test]
fn file_storage_requires_explicit_filename() {
    let dir = tempdir().unwrap();
    let config = DiskEngineConfig::new(dir.path()).with_storage_type(StorageType::File);
    let mut disk = DiskEngine::open(config).unwrap();

    assert!(!disk.save("a", b"no filename given", None, None));
    assert!(disk.save("a", b"with a filename", Some("a.bin"), None));
}
