//! Cache configuration structures.
//!
//! Mirrors the builder-with-validate convention used across this crate's
//! sibling configuration types: a `Default` impl matching the documented
//! defaults, `with_*` setters that consume and return `Self`, and a
//! `validate()` step the engine constructors call before doing any I/O.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a disk-engine value is allowed to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// Every value is written as a standalone file in the data directory;
    /// `save` without an explicit filename is rejected.
    File,
    /// Every value is inlined into the manifest's `inline_data` column.
    Sqlite,
    /// Values route to a file when the caller supplies (or the engine
    /// derives) a filename, and inline otherwise.
    Mixed,
}

/// Configuration for a [`crate::disk_engine::DiskEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEngineConfig {
    /// Root directory; holds `manifest.sqlite{,-shm,-wal}`, `data/`, `trash/`.
    pub path: PathBuf,
    /// Routing policy for values that arrive without an explicit filename.
    pub storage_type: StorageType,
    /// Emit a `warn`-level log line whenever an operation fails.
    pub error_logs_enabled: bool,
    /// Maximum consecutive database-open failures before runtime reopen
    /// attempts stop being made (construction-time retry is a single
    /// reset-and-retry regardless of this limit).
    pub max_open_failures: u32,
    /// Minimum interval between runtime reopen attempts after a failure.
    pub min_reopen_interval: Duration,
}

impl Default for DiskEngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache"),
            storage_type: StorageType::Mixed,
            error_logs_enabled: true,
            max_open_failures: 8,
            min_reopen_interval: Duration::from_secs(2),
        }
    }
}

impl DiskEngineConfig {
    /// Start from the defaults, rooted at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the value-routing policy.
    #[must_use]
    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    /// Enable or disable failure logging.
    #[must_use]
    pub fn with_error_logs_enabled(mut self, enabled: bool) -> Self {
        self.error_logs_enabled = enabled;
        self
    }

    /// Validate the configuration, including the platform path-length budget:
    /// construction fails if `path` would leave fewer than 64 bytes of
    /// headroom under the platform maximum.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path must not be empty".to_string());
        }

        let longest_child = self.path.join("manifest.sqlite-wal");
        let max_len = platform_max_path_len();
        let len = longest_child.as_os_str().len();
        if len + 64 > max_len {
            return Err(format!(
                "path too long: {len} bytes leaves less than 64 bytes of headroom under the platform limit of {max_len}"
            ));
        }

        if self.min_reopen_interval.is_zero() {
            return Err("min_reopen_interval must be greater than zero".to_string());
        }

        Ok(())
    }

    pub(crate) fn data_dir(&self) -> PathBuf {
        self.path.join("data")
    }

    pub(crate) fn trash_dir(&self) -> PathBuf {
        self.path.join("trash")
    }

    pub(crate) fn db_path(&self) -> PathBuf {
        self.path.join("manifest.sqlite")
    }
}

#[cfg(unix)]
fn platform_max_path_len() -> usize {
    4096 // PATH_MAX on Linux
}

#[cfg(not(unix))]
fn platform_max_path_len() -> usize {
    260 // MAX_PATH on Windows
}

/// Where an evicted memory-cache value gets dropped.
///
/// Some embedded object types have destruction affinity to a specific
/// thread (UI toolkits, GPU handles); this lets a host pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleasePolicy {
    /// Drop on the caller's thread, inside the engine's lock-free hand-off.
    Inline,
    /// Hand off to a dedicated background worker.
    Background,
    /// Hand off to the host-designated main/UI thread.
    MainThread,
}

/// Configuration for a [`crate::memory_engine::MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEngineConfig {
    /// Maximum live entry count (`None` = unbounded).
    pub count_limit: Option<usize>,
    /// Maximum aggregate cost (`None` = unbounded).
    pub cost_limit: Option<u64>,
    /// Maximum entry age before the periodic trimmer evicts it (`None` =
    /// unbounded).
    pub age_limit: Option<Duration>,
    /// How often the background trimmer runs `trim_to_count`/`trim_to_cost`/
    /// `trim_to_age` in sequence.
    pub auto_trim_interval: Duration,
    /// Call `remove_all()` when [`crate::memory_engine::MemoryEngine::on_memory_pressure`] fires.
    pub should_remove_all_on_memory_warning: bool,
    /// Call `remove_all()` when [`crate::memory_engine::MemoryEngine::on_enter_background`] fires.
    pub should_remove_all_on_enter_background: bool,
    /// Where evicted values are dropped.
    pub release_policy: ReleasePolicy,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            count_limit: None,
            cost_limit: None,
            age_limit: None,
            auto_trim_interval: Duration::from_secs(5),
            should_remove_all_on_memory_warning: true,
            should_remove_all_on_enter_background: true,
            release_policy: ReleasePolicy::Background,
        }
    }
}

impl MemoryEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_count_limit(mut self, limit: usize) -> Self {
        self.count_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_cost_limit(mut self, limit: u64) -> Self {
        self.cost_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_age_limit(mut self, limit: Duration) -> Self {
        self.age_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_auto_trim_interval(mut self, interval: Duration) -> Self {
        self.auto_trim_interval = interval;
        self
    }

    #[must_use]
    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.auto_trim_interval.is_zero() {
            return Err("auto_trim_interval must be greater than zero".to_string());
        }
        if self.count_limit == Some(0) {
            return Err("count_limit must be greater than zero when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_config_defaults_match_spec() {
        let cfg = DiskEngineConfig::default();
        assert_eq!(cfg.storage_type, StorageType::Mixed);
        assert!(cfg.error_logs_enabled);
        assert_eq!(cfg.max_open_failures, 8);
        assert_eq!(cfg.min_reopen_interval, Duration::from_secs(2));
    }

    #[test]
    fn memory_config_defaults_match_spec() {
        let cfg = MemoryEngineConfig::default();
        assert_eq!(cfg.count_limit, None);
        assert_eq!(cfg.cost_limit, None);
        assert_eq!(cfg.age_limit, None);
        assert_eq!(cfg.auto_trim_interval, Duration::from_secs(5));
        assert!(cfg.should_remove_all_on_memory_warning);
        assert!(cfg.should_remove_all_on_enter_background);
    }

    #[test]
    fn disk_config_rejects_oversized_path() {
        let huge = "a".repeat(platform_max_path_len());
        let cfg = DiskEngineConfig::new(Path::new(&huge));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn memory_config_rejects_zero_count_limit() {
        let cfg = MemoryEngineConfig::new().with_count_limit(0);
        assert!(cfg.validate().is_err());
    }
}
