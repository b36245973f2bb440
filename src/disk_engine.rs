//! Orchestrates [`crate::manifest::Manifest`] and [`crate::blob_store::BlobStore`]
//! behind the save/read/trim operations a caller actually sees.
//!
//! Not thread-safe: every method here takes `&mut self`. Callers wanting
//! sharded concurrency run multiple `DiskEngine`s on disjoint paths rather
//! than sharing one behind a lock.

use std::fs;
use std::path::Path;

use bytes::Bytes;

use crate::blob_store::BlobStore;
use crate::config::{DiskEngineConfig, StorageType};
use crate::error::{log_failure, CacheError};
use crate::manifest::Manifest;

const TRIM_BATCH: usize = 16;
const REMOVE_ALL_BATCH: usize = 32;

/// One stored value plus its extended data, as returned by [`DiskEngine::get_item`].
///
/// `value` is `Bytes` rather than `Vec<u8>` so a caller holding onto a
/// cached item (e.g. to serve it to several readers) can clone the handle
/// without copying the backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub value: Bytes,
    pub extended: Option<Vec<u8>>,
}

/// Point-in-time counters for a [`DiskEngine`]; an ambient convenience, not
/// a documented operation in its own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskEngineStats {
    pub count: i64,
    pub total_size: i64,
}

pub struct DiskEngine {
    config: DiskEngineConfig,
    manifest: Manifest,
    blobs: BlobStore,
}

impl DiskEngine {
    /// Creates the root/data/trash directories, opens the database, and
    /// drains any trash left behind by a previous run. On schema-init
    /// failure, resets and retries exactly once; a second failure is
    /// terminal and `open` returns `None`.
    pub fn open(config: DiskEngineConfig) -> Option<Self> {
        if let Err(err) = config.validate() {
            log_failure(
                config.error_logs_enabled,
                "open",
                &CacheError::InvalidArgument(err),
            );
            return None;
        }

        fs::create_dir_all(&config.path).ok()?;
        let blobs = BlobStore::new(&config).ok()?;
        let mut manifest = Manifest::new(&config);

        if !manifest.try_open_and_init() {
            manifest.close();
            if !blobs.reset() {
                return None;
            }
            let mut manifest = Manifest::new(&config);
            if !manifest.try_open_and_init() {
                return None;
            }
            blobs.drain_existing_trash();
            return Some(Self { config, manifest, blobs });
        }

        blobs.drain_existing_trash();
        Some(Self { config, manifest, blobs })
    }

    fn warn(&self, context: &str, msg: &str) {
        log_failure(
            self.config.error_logs_enabled,
            context,
            &CacheError::InvalidArgument(msg.to_string()),
        );
    }

    fn default_filename(key: &str) -> String {
        let digest = md5::compute(key.as_bytes());
        hex::encode(digest.0)
    }

    /// Save routing: reject empty key/value; File storage requires
    /// an explicit filename; inline writes clean up any stale out-of-line
    /// file the key previously owned.
    pub fn save(
        &mut self,
        key: &str,
        value: &[u8],
        filename: Option<&str>,
        extended: Option<&[u8]>,
    ) -> bool {
        if key.is_empty() || value.is_empty() {
            self.warn("save", "key and value must both be non-empty");
            return false;
        }
        if self.config.storage_type == StorageType::File && filename.is_none() {
            self.warn("save", "File storage requires an explicit filename");
            return false;
        }

        if let Some(filename) = filename {
            if !self.blobs.write(filename, value) {
                return false;
            }
            if !self.manifest.save(key, Some(filename), value, extended) {
                self.blobs.delete(filename);
                return false;
            }
            return true;
        }

        if self.config.storage_type != StorageType::Sqlite {
            if let Some(stale) = self.manifest.get_filename(key) {
                self.blobs.delete(&stale);
            }
        }
        self.manifest.save(key, None, value, extended)
    }

    /// Convenience over [`DiskEngine::save`] that derives a filename from a
    /// content hash of `key` when the router needs one and the caller didn't
    /// supply one.
    pub fn save_with_default_filename(
        &mut self,
        key: &str,
        value: &[u8],
        extended: Option<&[u8]>,
    ) -> bool {
        let filename = Self::default_filename(key);
        self.save(key, value, Some(&filename), extended)
    }

    /// Returns the value bytes for `key`, self-healing if a
    /// manifest row references a file that no longer exists.
    pub fn get_value(&mut self, key: &str) -> Option<Bytes> {
        self.get_item(key).map(|item| item.value)
    }

    /// Returns both the value and extended bytes for `key`.
    pub fn get_item(&mut self, key: &str) -> Option<CacheItem> {
        let row = self.manifest.get(key, false)?;

        let value = if let Some(filename) = row.filename.as_deref() {
            match self.blobs.read(filename) {
                Some(bytes) => bytes,
                None => {
                    self.manifest.delete(key);
                    return None;
                }
            }
        } else {
            Bytes::from(row.inline_data)
        };

        self.manifest.update_access_time(key);
        Some(CacheItem {
            value,
            extended: row.extended_data,
        })
    }

    pub fn contains(&mut self, key: &str) -> bool {
        self.manifest.get(key, true).is_some()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if let Some(filename) = self.manifest.get_filename(key) {
            self.blobs.delete(&filename);
        }
        self.manifest.delete(key)
    }

    pub fn count(&mut self) -> i64 {
        self.manifest.count()
    }

    pub fn size_sum(&mut self) -> i64 {
        self.manifest.size_sum()
    }

    pub fn stats(&mut self) -> DiskEngineStats {
        DiskEngineStats {
            count: self.count(),
            total_size: self.size_sum(),
        }
    }

    /// Repeatedly evicts the 16 least-recently-used entries until the
    /// aggregate is within `max` bytes, or a batch comes back empty.
    /// Checkpoints on success (resolving the open question in favor of an
    /// unconditional checkpoint).
    pub fn trim_to_size(&mut self, max: i64) -> bool {
        self.trim_by(max, Manifest::size_sum, |size| size)
    }

    /// As [`DiskEngine::trim_to_size`], but budgeted by row count.
    pub fn trim_to_count(&mut self, max: i64) -> bool {
        self.trim_by(max, Manifest::count, |_| 1)
    }

    fn trim_by(
        &mut self,
        max: i64,
        aggregate: fn(&mut Manifest) -> i64,
        weight: fn(i64) -> i64,
    ) -> bool {
        let mut current = aggregate(&mut self.manifest);
        if current < 0 {
            return false;
        }
        while current > max {
            let batch = self.manifest.get_lru_info(TRIM_BATCH);
            if batch.is_empty() {
                break;
            }
            for candidate in batch {
                if let Some(filename) = candidate.filename.as_deref() {
                    self.blobs.delete(filename);
                }
                self.manifest.delete(&candidate.key);
                current -= weight(candidate.size);
                if current <= max {
                    break;
                }
            }
        }
        self.manifest.checkpoint()
    }

    /// Deletes every row whose `last_access_time` is older than `t`, and the
    /// files it referenced.
    pub fn trim_older_than(&mut self, t: i64) -> bool {
        let filenames = self.manifest.get_filenames_where_access_lt(t);
        for filename in &filenames {
            self.blobs.delete(filename);
        }
        self.manifest.delete_where_access_lt(t);
        self.manifest.checkpoint()
    }

    /// Deletes every row larger than `n` bytes, and the files it referenced.
    pub fn trim_larger_than(&mut self, n: i64) -> bool {
        let filenames = self.manifest.get_filenames_where_size_gt(n);
        for filename in &filenames {
            self.blobs.delete(filename);
        }
        self.manifest.delete_where_size_gt(n);
        self.manifest.checkpoint()
    }

    /// Fast path: close, reset (trash the data directory,
    /// drop the database), reopen, reinitialize. O(1) in the number of
    /// stored entries.
    pub fn remove_all(&mut self) -> bool {
        self.manifest.close();
        let db_path = self.manifest.db_path().to_path_buf();
        remove_db_files(&db_path);

        if !self.blobs.reset() {
            return false;
        }
        self.manifest.try_open_and_init()
    }

    /// Slow path: iterates LRU batches of 32, deleting each file and row and
    /// reporting progress. Used when a caller wants incremental feedback
    /// instead of the instantaneous directory-rename path.
    pub fn remove_all_with_progress(&mut self, mut progress: impl FnMut(usize)) -> bool {
        let mut removed = 0usize;
        loop {
            let batch = self.manifest.get_lru_info(REMOVE_ALL_BATCH);
            if batch.is_empty() {
                break;
            }
            for candidate in &batch {
                if let Some(filename) = candidate.filename.as_deref() {
                    self.blobs.delete(filename);
                }
                self.manifest.delete(&candidate.key);
            }
            removed += batch.len();
            progress(removed);
        }
        self.manifest.checkpoint()
    }

    pub fn data_dir(&self) -> &Path {
        self.blobs.data_dir()
    }
}

fn remove_db_files(db_path: &Path) {
    let _ = fs::remove_file(db_path);
    let _ = fs::remove_file(db_path.with_extension("sqlite-shm"));
    let _ = fs::remove_file(db_path.with_extension("sqlite-wal"));
}

impl Drop for DiskEngine {
    fn drop(&mut self) {
        self.manifest.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageType;
    use tempfile::tempdir;

    fn open_engine() -> (tempfile::TempDir, DiskEngine) {
        let dir = tempdir().unwrap();
        let config = DiskEngineConfig::new(dir.path());
        let engine = DiskEngine::open(config).unwrap();
        (dir, engine)
    }

    #[test]
    fn rejects_empty_key_or_value() {
        let (_dir, mut e) = open_engine();
        assert!(!e.save("", b"v", None, None));
        assert!(!e.save("k", b"", None, None));
    }

    #[test]
    fn inline_vs_file_routing_mixed() {
        let (_dir, mut e) = open_engine();
        assert!(e.save("a", &[1u8; 10], None, None));
        let big = vec![7u8; 30_000];
        assert!(e.save("b", &big, Some("b.bin"), None));

        let row_a = e.get_item("a").unwrap();
        assert_eq!(row_a.value.len(), 10);

        let path = e.data_dir().join("b.bin");
        assert_eq!(fs::metadata(&path).unwrap().len(), 30_000);
        let row_b = e.get_item("b").unwrap();
        assert_eq!(row_b.value.len(), 30_000);
    }

    #[test]
    fn file_storage_rejects_missing_filename() {
        let dir = tempdir().unwrap();
        let config = DiskEngineConfig::new(dir.path()).with_storage_type(StorageType::File);
        let mut e = DiskEngine::open(config).unwrap();
        assert!(!e.save("a", b"value", None, None));
    }

    #[test]
    fn self_heals_when_backing_file_vanishes() {
        let (_dir, mut e) = open_engine();
        assert!(e.save("a", b"hello", Some("a.bin"), None));
        fs::remove_file(e.data_dir().join("a.bin")).unwrap();

        assert!(e.get_value("a").is_none());
        assert!(!e.contains("a"));
    }

    #[test]
    fn trim_to_size_keeps_most_recently_stored() {
        let (_dir, mut e) = open_engine();
        for i in 0..100 {
            e.save(&format!("k{i}"), &[0u8; 1000], None, None);
        }
        assert!(e.trim_to_size(50_000));
        assert!(e.size_sum() <= 50_000);
        assert!(e.contains("k99"));
        assert!(!e.contains("k0"));
    }

    #[test]
    fn remove_all_empties_the_store() {
        let (_dir, mut e) = open_engine();
        for i in 0..10 {
            e.save(&format!("k{i}"), b"value", None, None);
        }
        assert!(e.remove_all());
        assert_eq!(e.count(), 0);
    }

    #[test]
    fn remove_all_with_progress_reports_batches() {
        let (_dir, mut e) = open_engine();
        for i in 0..70 {
            e.save(&format!("k{i}"), b"value", None, None);
        }
        let mut calls = Vec::new();
        assert!(e.remove_all_with_progress(|n| calls.push(n)));
        assert_eq!(e.count(), 0);
        assert_eq!(*calls.last().unwrap(), 70);
    }

    #[test]
    fn reopen_after_database_deleted_out_of_band() {
        let dir = tempdir().unwrap();
        let config = DiskEngineConfig::new(dir.path());
        {
            let mut e = DiskEngine::open(config.clone()).unwrap();
            e.save("a", b"value", None, None);
        }
        fs::remove_file(config.db_path()).unwrap();

        let mut e = DiskEngine::open(config).unwrap();
        assert_eq!(e.count(), 0);
    }
}
