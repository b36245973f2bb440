//! Maps SQL text to a prepared statement on a single open database handle.
//!
//! Thin logging wrapper around [`rusqlite::Connection::prepare_cached`]: on a
//! hit the connection resets and rebinds the cached statement; on a miss it
//! compiles and inserts. The cache holds no ownership of the handle — it is
//! finalized as a unit (`flush_prepared_statement_cache`) right before the
//! connection closes, never outliving it.

use rusqlite::{CachedStatement, Connection};

use crate::error::{log_failure, CacheError};

/// Prepares statements against a connection, logging compile failures.
pub(crate) struct StatementCache {
    error_logs_enabled: bool,
}

impl StatementCache {
    pub(crate) fn new(error_logs_enabled: bool) -> Self {
        Self { error_logs_enabled }
    }

    /// Returns a ready-to-bind statement for `sql`, or `None` on compile
    /// failure (logged iff failure logging is enabled).
    pub(crate) fn prepare<'conn>(
        &self,
        conn: &'conn Connection,
        sql: &str,
    ) -> Option<CachedStatement<'conn>> {
        match conn.prepare_cached(sql) {
            Ok(stmt) => Some(stmt),
            Err(err) => {
                log_failure(self.error_logs_enabled, "prepare", &CacheError::from(err));
                None
            }
        }
    }

    /// Disposes every cached statement on `conn`. Must be called exactly
    /// once, right before the connection is closed.
    pub(crate) fn finalize_all(&self, conn: &Connection) {
        conn.flush_prepared_statement_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_hit_reuses_and_resets() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(k TEXT)", []).unwrap();
        let cache = StatementCache::new(true);

        {
            let mut stmt = cache.prepare(&conn, "INSERT INTO t(k) VALUES (?1)").unwrap();
            stmt.execute(["a"]).unwrap();
        }
        {
            let mut stmt = cache.prepare(&conn, "INSERT INTO t(k) VALUES (?1)").unwrap();
            stmt.execute(["b"]).unwrap();
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn prepare_miss_on_bad_sql_returns_none() {
        let conn = Connection::open_in_memory().unwrap();
        let cache = StatementCache::new(false);
        assert!(cache.prepare(&conn, "NOT VALID SQL").is_none());
    }

    #[test]
    fn finalize_all_does_not_panic_on_empty_cache() {
        let conn = Connection::open_in_memory().unwrap();
        let cache = StatementCache::new(true);
        cache.finalize_all(&conn);
    }
}
