//! The relational schema and every query/update primitive against it.
//!
//! The manifest table is the single source of truth for membership, size,
//! and access timestamps. This module owns the database handle and the
//! reopen/recovery policy; [`crate::disk_engine::DiskEngine`]
//! only orchestrates it against the blob store.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::{params_from_iter, Connection};

use crate::config::DiskEngineConfig;
use crate::error::{log_failure, CacheError};
use crate::stmt_cache::StatementCache;

/// One manifest row, minus `inline_data` when the caller asked to exclude it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub key: String,
    pub filename: Option<String>,
    pub size: i64,
    pub inline_data: Vec<u8>,
    pub modification_time: i64,
    pub last_access_time: i64,
    pub extended_data: Option<Vec<u8>>,
}

/// One eviction candidate, ordered ascending by `last_access_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruCandidate {
    pub key: String,
    pub filename: Option<String>,
    pub size: i64,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub(crate) struct Manifest {
    db_path: PathBuf,
    conn: Option<Connection>,
    stmt_cache: StatementCache,
    error_logs_enabled: bool,
    max_open_failures: u32,
    min_reopen_interval: Duration,
    open_failures: u32,
    last_failure: Option<Instant>,
}

impl Manifest {
    pub(crate) fn new(config: &DiskEngineConfig) -> Self {
        Self {
            db_path: config.db_path(),
            conn: None,
            stmt_cache: StatementCache::new(config.error_logs_enabled),
            error_logs_enabled: config.error_logs_enabled,
            max_open_failures: config.max_open_failures,
            min_reopen_interval: config.min_reopen_interval,
            open_failures: 0,
            last_failure: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn warn(&self, context: &str, err: impl std::fmt::Display) {
        log_failure(
            self.error_logs_enabled,
            context,
            &CacheError::IoFailure(err.to_string()),
        );
    }

    /// Opens the database and creates the schema if needed. Used for the
    /// construction-time open (tried once, then once more after a reset by
    /// the disk engine) and is otherwise idempotent.
    pub(crate) fn try_open_and_init(&mut self) -> bool {
        match self.open_and_init_inner() {
            Ok(conn) => {
                self.conn = Some(conn);
                self.open_failures = 0;
                self.last_failure = None;
                true
            }
            Err(err) => {
                self.warn("open", &err);
                self.open_failures += 1;
                self.last_failure = Some(Instant::now());
                false
            }
        }
    }

    fn open_and_init_inner(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS manifest(
                key TEXT PRIMARY KEY,
                filename TEXT,
                size INTEGER,
                inline_data BLOB,
                modification_time INTEGER,
                last_access_time INTEGER,
                extended_data BLOB
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS last_access_time_idx ON manifest(last_access_time)",
            [],
        )?;
        Ok(conn)
    }

    /// Called by every operation before touching the connection. Reopens
    /// lazily if fewer than `max_open_failures` have occurred and at least
    /// `min_reopen_interval` has passed since the last one.
    fn ensure_open(&mut self) -> bool {
        if self.conn.is_some() {
            return true;
        }
        if self.open_failures >= self.max_open_failures {
            return false;
        }
        if let Some(last) = self.last_failure {
            if last.elapsed() < self.min_reopen_interval {
                return false;
            }
        }
        self.try_open_and_init()
    }

    /// Closes the handle, finalizing every cached statement first. Retries
    /// on "busy"/"locked" until it succeeds.
    pub(crate) fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.stmt_cache.finalize_all(&conn);
        let mut conn = conn;
        loop {
            match conn.close() {
                Ok(()) => break,
                Err((bad_conn, err)) => {
                    self.warn("close", &err);
                    conn = bad_conn;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }

    // -- single-row operations (via the statement cache) ----------------

    pub(crate) fn save(
        &mut self,
        key: &str,
        filename: Option<&str>,
        value: &[u8],
        extended: Option<&[u8]>,
    ) -> bool {
        if !self.ensure_open() {
            return false;
        }
        let now = now_secs();
        let size = value.len() as i64;
        let inline: &[u8] = if filename.is_some() { &[] } else { value };
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self.stmt_cache.prepare(
            conn,
            "INSERT INTO manifest(key, filename, size, inline_data, modification_time, last_access_time, extended_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                size = excluded.size,
                inline_data = excluded.inline_data,
                modification_time = excluded.modification_time,
                last_access_time = excluded.last_access_time,
                extended_data = excluded.extended_data",
        ) else {
            return false;
        };
        let result = stmt.execute(rusqlite::params![key, filename, size, inline, now, extended]);
        match result {
            Ok(_) => true,
            Err(err) => {
                self.warn("save", err);
                false
            }
        }
    }

    pub(crate) fn update_access_time(&mut self, key: &str) -> bool {
        if !self.ensure_open() {
            return false;
        }
        let now = now_secs();
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self
            .stmt_cache
            .prepare(conn, "UPDATE manifest SET last_access_time = ?1 WHERE key = ?2")
        else {
            return false;
        };
        stmt.execute(rusqlite::params![now, key]).is_ok()
    }

    pub(crate) fn update_access_time_many(&mut self, keys: &[String]) -> bool {
        if keys.is_empty() {
            return true;
        }
        if !self.ensure_open() {
            return false;
        }
        let now = now_secs();
        let conn = self.conn.as_ref().unwrap();
        let sql = format!(
            "UPDATE manifest SET last_access_time = ? WHERE key IN ({})",
            placeholders(keys.len())
        );
        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(keys.len() + 1);
        params.push(&now);
        for k in keys {
            params.push(k);
        }
        conn.execute(&sql, params_from_iter(params)).is_ok()
    }

    pub(crate) fn delete(&mut self, key: &str) -> bool {
        if !self.ensure_open() {
            return false;
        }
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self.stmt_cache.prepare(conn, "DELETE FROM manifest WHERE key = ?1") else {
            return false;
        };
        stmt.execute([key]).is_ok()
    }

    pub(crate) fn delete_many(&mut self, keys: &[String]) -> bool {
        if keys.is_empty() {
            return true;
        }
        if !self.ensure_open() {
            return false;
        }
        let conn = self.conn.as_ref().unwrap();
        let sql = format!("DELETE FROM manifest WHERE key IN ({})", placeholders(keys.len()));
        conn.execute(&sql, params_from_iter(keys.iter())).is_ok()
    }

    pub(crate) fn delete_where_size_gt(&mut self, n: i64) -> bool {
        if !self.ensure_open() {
            return false;
        }
        self.conn
            .as_ref()
            .unwrap()
            .execute("DELETE FROM manifest WHERE size > ?1", [n])
            .is_ok()
    }

    pub(crate) fn delete_where_access_lt(&mut self, t: i64) -> bool {
        if !self.ensure_open() {
            return false;
        }
        self.conn
            .as_ref()
            .unwrap()
            .execute("DELETE FROM manifest WHERE last_access_time < ?1", [t])
            .is_ok()
    }

    pub(crate) fn get(&mut self, key: &str, exclude_inline: bool) -> Option<ManifestRow> {
        if !self.ensure_open() {
            return None;
        }
        let sql = if exclude_inline {
            "SELECT key, filename, size, NULL, modification_time, last_access_time, extended_data
             FROM manifest WHERE key = ?1"
        } else {
            "SELECT key, filename, size, inline_data, modification_time, last_access_time, extended_data
             FROM manifest WHERE key = ?1"
        };
        let conn = self.conn.as_ref().unwrap();
        let mut stmt = self.stmt_cache.prepare(conn, sql)?;
        stmt.query_row([key], row_to_manifest_row).ok()
    }

    pub(crate) fn get_many(&mut self, keys: &[String], exclude_inline: bool) -> Vec<ManifestRow> {
        if keys.is_empty() {
            return Vec::new();
        }
        if !self.ensure_open() {
            return Vec::new();
        }
        let inline_col = if exclude_inline { "NULL" } else { "inline_data" };
        let sql = format!(
            "SELECT key, filename, size, {inline_col}, modification_time, last_access_time, extended_data
             FROM manifest WHERE key IN ({})",
            placeholders(keys.len())
        );
        run_query_collect(self.conn.as_ref().unwrap(), &sql, keys, row_to_manifest_row)
    }

    pub(crate) fn get_value(&mut self, key: &str) -> Option<Vec<u8>> {
        if !self.ensure_open() {
            return None;
        }
        let conn = self.conn.as_ref().unwrap();
        let mut stmt = self
            .stmt_cache
            .prepare(conn, "SELECT inline_data FROM manifest WHERE key = ?1")?;
        stmt.query_row([key], |row| row.get(0)).ok()
    }

    pub(crate) fn get_filename(&mut self, key: &str) -> Option<String> {
        if !self.ensure_open() {
            return None;
        }
        let conn = self.conn.as_ref().unwrap();
        let mut stmt = self
            .stmt_cache
            .prepare(conn, "SELECT filename FROM manifest WHERE key = ?1")?;
        let filename: Option<String> = stmt.query_row([key], |row| row.get(0)).ok().flatten();
        filename.filter(|f| !f.is_empty())
    }

    pub(crate) fn get_filenames_many(&mut self, keys: &[String]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        if !self.ensure_open() {
            return Vec::new();
        }
        let sql = format!(
            "SELECT filename FROM manifest WHERE key IN ({}) AND filename IS NOT NULL AND filename != ''",
            placeholders(keys.len())
        );
        run_query_collect(self.conn.as_ref().unwrap(), &sql, keys, |row| row.get(0))
    }

    pub(crate) fn get_filenames_where_size_gt(&mut self, n: i64) -> Vec<String> {
        if !self.ensure_open() {
            return Vec::new();
        }
        query_filenames(
            self.conn.as_ref().unwrap(),
            "SELECT filename FROM manifest WHERE size > ?1 AND filename IS NOT NULL AND filename != ''",
            n,
        )
    }

    pub(crate) fn get_filenames_where_access_lt(&mut self, t: i64) -> Vec<String> {
        if !self.ensure_open() {
            return Vec::new();
        }
        query_filenames(
            self.conn.as_ref().unwrap(),
            "SELECT filename FROM manifest WHERE last_access_time < ?1 AND filename IS NOT NULL AND filename != ''",
            t,
        )
    }

    /// Up to `limit` eviction candidates, ascending `last_access_time`;
    /// ties break on `key` so a single query is deterministic.
    pub(crate) fn get_lru_info(&mut self, limit: usize) -> Vec<LruCandidate> {
        if !self.ensure_open() {
            return Vec::new();
        }
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self.stmt_cache.prepare(
            conn,
            "SELECT key, filename, size FROM manifest
             ORDER BY last_access_time ASC, key ASC LIMIT ?1",
        ) else {
            return Vec::new();
        };
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(LruCandidate {
                key: row.get(0)?,
                filename: row.get(1)?,
                size: row.get(2)?,
            })
        });
        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn count(&mut self) -> i64 {
        if !self.ensure_open() {
            return -1;
        }
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self.stmt_cache.prepare(conn, "SELECT COUNT(*) FROM manifest") else {
            return -1;
        };
        stmt.query_row([], |row| row.get(0)).unwrap_or(-1)
    }

    pub(crate) fn size_sum(&mut self) -> i64 {
        if !self.ensure_open() {
            return -1;
        }
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self
            .stmt_cache
            .prepare(conn, "SELECT COALESCE(SUM(size), 0) FROM manifest")
        else {
            return -1;
        };
        stmt.query_row([], |row| row.get(0)).unwrap_or(-1)
    }

    pub(crate) fn checkpoint(&mut self) -> bool {
        if !self.ensure_open() {
            return false;
        }
        let conn = self.conn.as_ref().unwrap();
        let Some(mut stmt) = self.stmt_cache.prepare(conn, "PRAGMA wal_checkpoint(PASSIVE)") else {
            return false;
        };
        stmt.query_row([], |_| Ok(())).is_ok()
    }
}

fn row_to_manifest_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ManifestRow> {
    Ok(ManifestRow {
        key: row.get(0)?,
        filename: row.get::<_, Option<String>>(1)?.filter(|f| !f.is_empty()),
        size: row.get(2)?,
        inline_data: row.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
        modification_time: row.get(4)?,
        last_access_time: row.get(5)?,
        extended_data: row.get(6)?,
    })
}

fn run_query_collect<T>(
    conn: &Connection,
    sql: &str,
    keys: &[String],
    mapper: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Vec<T> {
    let Ok(mut stmt) = conn.prepare(sql) else {
        return Vec::new();
    };
    let rows = stmt.query_map(params_from_iter(keys.iter()), mapper);
    match rows {
        Ok(rows) => rows.filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    }
}

fn query_filenames(conn: &Connection, sql: &str, bound: i64) -> Vec<String> {
    let Ok(mut stmt) = conn.prepare(sql) else {
        return Vec::new();
    };
    let rows = stmt.query_map([bound], |row| row.get(0));
    match rows {
        Ok(rows) => rows.filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    }
}
