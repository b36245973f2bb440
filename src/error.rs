//! Error taxonomy shared by both cache engines.
//!
//! Every public engine operation still returns a plain `bool` or `Option<T>`
//! per the propagation policy described in the crate docs: a `CacheError` is
//! never unwound across an engine boundary. It exists so that the handful of
//! operations that *can* usefully report a reason (engine construction, the
//! one-shot recovery path) have something richer than a boolean to log and
//! return, and so failures are classified consistently wherever they're
//! logged.

use thiserror::Error;

/// Error kinds produced while operating a disk or memory cache engine.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An empty key, empty value, oversized path, or storage-type mismatch
    /// was supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A filesystem or database I/O operation failed.
    #[error("io failure: {0}")]
    IoFailure(String),

    /// Schema initialization failed on a handle that previously worked;
    /// triggers the one-shot reset-and-retry recovery path.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// The requested key is not present, or was present but its backing
    /// file had gone missing (and has now been self-healed away).
    #[error("missing: {0}")]
    Missing(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

/// Convenience alias used internally; public surfaces collapse this to
/// `bool`/`Option` per the crate's error propagation policy.
pub type CacheResult<T> = Result<T, CacheError>;

/// Logs `err` at `warn` level iff `enabled`, tagged with `context`.
///
/// Centralizes the "failures are logged iff `error_logs_enabled` is true"
/// rule so call sites don't each re-implement the gate.
pub(crate) fn log_failure(enabled: bool, context: &str, err: &CacheError) {
    if enabled {
        tracing::warn!(context, error = %err, "cache operation failed");
    }
}
