//! The filesystem side of the disk engine: a data directory of named blobs
//! and a trash directory that absorbs whole subtrees pending deletion.
//!
//! `move_all_to_trash` is the reason `remove_all` can be near-instantaneous
//! It renames the data directory instead of unlinking
//! every file in it. The rename's target only needs to be unique, so a
//! random 128-bit id stands in for a UUID here rather than pulling in a
//! dedicated crate for it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use bytes::Bytes;
use rand::RngCore;

use crate::config::DiskEngineConfig;
use crate::error::{log_failure, CacheError};

pub(crate) struct BlobStore {
    data_dir: PathBuf,
    trash_dir: PathBuf,
    error_logs_enabled: bool,
    drain_tx: Option<mpsc::Sender<PathBuf>>,
    _drain_worker: Option<thread::JoinHandle<()>>,
}

impl BlobStore {
    pub(crate) fn new(config: &DiskEngineConfig) -> std::io::Result<Self> {
        let data_dir = config.data_dir();
        let trash_dir = config.trash_dir();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&trash_dir)?;

        let (drain_tx, drain_rx) = mpsc::channel::<PathBuf>();
        let error_logs_enabled = config.error_logs_enabled;
        let worker = thread::Builder::new()
            .name("duocache-trash-drain".into())
            .spawn(move || {
                for subtree in drain_rx {
                    if let Err(err) = fs::remove_dir_all(&subtree) {
                        log_failure(
                            error_logs_enabled,
                            "drain",
                            &CacheError::IoFailure(format!("{}: {err}", subtree.display())),
                        );
                    }
                }
            })
            .ok();

        Ok(Self {
            data_dir,
            trash_dir,
            error_logs_enabled: config.error_logs_enabled,
            drain_tx: worker.as_ref().map(|_| drain_tx),
            _drain_worker: worker,
        })
    }

    fn warn(&self, context: &str, err: impl std::fmt::Display) {
        log_failure(
            self.error_logs_enabled,
            context,
            &CacheError::IoFailure(err.to_string()),
        );
    }

    pub(crate) fn write(&self, name: &str, bytes: &[u8]) -> bool {
        match fs::write(self.data_dir.join(name), bytes) {
            Ok(()) => true,
            Err(err) => {
                self.warn("write", err);
                false
            }
        }
    }

    pub(crate) fn read(&self, name: &str) -> Option<Bytes> {
        match fs::read(self.data_dir.join(name)) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(err) => {
                self.warn("read", err);
                None
            }
        }
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.data_dir.join(name).is_file()
    }

    pub(crate) fn delete(&self, name: &str) -> bool {
        match fs::remove_file(self.data_dir.join(name)) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                self.warn("delete", err);
                false
            }
        }
    }

    /// Renames the data directory into a fresh uniquely-named subtree under
    /// `trash/`, then recreates an empty data directory. O(1) regardless of
    /// how many blobs the data directory held.
    pub(crate) fn move_all_to_trash(&self) -> bool {
        let dest = self.trash_dir.join(random_subtree_name());
        match fs::rename(&self.data_dir, &dest) {
            Ok(()) => {}
            Err(err) => {
                self.warn("move_all_to_trash", err);
                return false;
            }
        }
        if let Err(err) = fs::create_dir_all(&self.data_dir) {
            self.warn("move_all_to_trash/recreate", err);
            return false;
        }
        self.drain(dest);
        true
    }

    /// Hands `subtree` to the dedicated trash-drain worker. Never blocks.
    fn drain(&self, subtree: PathBuf) {
        if let Some(tx) = &self.drain_tx {
            let _ = tx.send(subtree);
        }
    }

    /// Enumerates whatever is already sitting in `trash/` (e.g. left over
    /// from a previous run that crashed before draining) and schedules each
    /// entry for deletion.
    pub(crate) fn drain_existing_trash(&self) {
        let Ok(entries) = fs::read_dir(&self.trash_dir) else {
            return;
        };
        for entry in entries.flatten() {
            self.drain(entry.path());
        }
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    /// Recovery primitive: empties the data directory into the trash and
    /// schedules the drain. Caller must have already closed the database.
    pub(crate) fn reset(&self) -> bool {
        self.move_all_to_trash()
    }
}

fn random_subtree_name() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempdir().unwrap();
        let config = DiskEngineConfig::new(dir.path());
        let store = BlobStore::new(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_delete_roundtrip() {
        let (_dir, store) = open_store();
        assert!(store.write("a.bin", b"hello"));
        assert_eq!(store.read("a.bin"), Some(Bytes::from_static(b"hello")));
        assert!(store.exists("a.bin"));
        assert!(store.delete("a.bin"));
        assert!(!store.exists("a.bin"));
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let (_dir, store) = open_store();
        assert!(store.delete("never-existed.bin"));
    }

    #[test]
    fn read_missing_file_returns_none() {
        let (_dir, store) = open_store();
        assert!(store.read("nope.bin").is_none());
    }

    #[test]
    fn move_all_to_trash_leaves_empty_data_dir_and_eventually_drains() {
        let (_dir, store) = open_store();
        store.write("a.bin", b"1");
        store.write("b.bin", b"2");

        assert!(store.move_all_to_trash());
        assert!(store.data_dir().is_dir());
        assert!(!store.exists("a.bin"));

        for _ in 0..200 {
            if fs::read_dir(store.trash_dir()).unwrap().next().is_none() {
                return;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("trash directory never drained");
    }

    #[test]
    fn random_subtree_names_are_distinct() {
        let a = random_subtree_name();
        let b = random_subtree_name();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
