//! A two-tier key-value cache: a thread-safe in-memory LRU layer and a
//! durable on-disk layer backed by an embedded relational manifest plus a
//! plain-file blob store.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐      ┌──────────────────────────────┐
//! │      MemoryEngine      │      │          DiskEngine           │
//! │  LinkedMap (LRU list    │      │  Manifest (sqlite)  BlobStore │
//! │  + hash index) behind   │      │  row metadata        │ files │
//! │  one parking_lot mutex  │      │  & small inline data │ /data │
//! └────────────────────────┘      └──────────────────────────────┘
//! ```
//!
//! The two engines are independent; nothing in this crate requires using
//! both. Keys are plain `&str`; disk values are raw bytes, memory values are
//! any `V: Send + 'static`. Encoding application objects into bytes for the
//! disk tier is left to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use duocache::{DiskEngine, DiskEngineConfig};
//!
//! let mut disk = DiskEngine::open(DiskEngineConfig::new("./cache")).expect("open cache");
//! disk.save("greeting", b"hello world", None, None);
//! assert_eq!(disk.get_value("greeting").as_deref(), Some(&b"hello world"[..]));
//! ```

mod blob_store;
mod config;
mod disk_engine;
mod error;
mod linked_map;
mod manifest;
mod memory_engine;
mod stats;
mod stmt_cache;

pub use config::{DiskEngineConfig, MemoryEngineConfig, ReleasePolicy, StorageType};
pub use disk_engine::{CacheItem, DiskEngine, DiskEngineStats};
pub use error::{CacheError, CacheResult};
pub use memory_engine::MemoryEngine;
pub use stats::MemoryEngineStats;

/// Re-exports the common entry points in one place for `use duocache::prelude::*;`.
pub mod prelude {
    pub use crate::{
        CacheItem, CacheError, CacheResult, DiskEngine, DiskEngineConfig, DiskEngineStats,
        MemoryEngine, MemoryEngineConfig, MemoryEngineStats, ReleasePolicy, StorageType,
    };
}
