//! Durable interval store
//!
//! One append-only table per category plus the schema version record and a
//! small key/value table for daemon state. Rows are only ever appended, and
//! only the most recently inserted row of a category may have its
//! `to_timestamp` moved.
//!
//! # Architecture
//!
//! ```text
//! Tracker::flush ──→ IntervalStore::transaction() ──→ IntervalTx
//!                          │                              │
//!                          │                              ├──→ get_last / append
//!                          │                              └──→ update_last_to_timestamp
//!                          │
//! IntervalQuery ──────────→┴──→ r2d2 pool (WAL, busy timeout)
//! ```
//!
//! WAL mode lets the HTTP readers run while a flush holds the write lock.
//! Every connection handed out by the pool is configured by the same init
//! hook, so readers and writers agree on pragmas.

pub mod migrations;
pub mod query;

pub use migrations::{MigrationError, Migrator};
pub use query::{Interval, IntervalQuery};

use crate::model::{Category, TimeEntry};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

const GENERATION_KEY: &str = "generation";

/// Failures surfaced by the interval store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("no {0} entry exists to update")]
    NoEntry(Category),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Connection pool tuning
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum pooled connections (writers and readers share the pool)
    pub pool_size: u32,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// A persisted entry together with its insertion-order id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: i64,
    pub entry: TimeEntry,
}

/// Handle to the SQLite interval store
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct IntervalStore {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for IntervalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalStore")
            .field("path", &self.path)
            .field("pool_size", &self.pool.max_size())
            .finish()
    }
}

impl IntervalStore {
    /// Open (or create) the store at `path` and bring it to the latest schema
    ///
    /// # Errors
    /// Fails if the directory cannot be created, the pool cannot hand out a
    /// connection, or the schema cannot be migrated. A store written by a
    /// newer build is rejected with `MigrationError::NewerThanSupported`.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, StoreError> {
        Self::open_with(path, options, &Migrator::default())
    }

    /// Like `open`, with an explicit migration set
    pub fn open_with(
        path: impl AsRef<Path>,
        options: &StoreOptions,
        migrator: &Migrator,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                "#,
            )?;
            conn.busy_timeout(busy_timeout)
        });
        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .build(manager)?;

        let mut conn = pool.get()?;
        let outcome = migrator.migrate(&mut conn)?;
        tracing::debug!(
            path = %path.display(),
            schema_version = outcome.to_version,
            migrations_applied = outcome.applied(),
            "Interval store ready"
        );

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a raw connection from the pool
    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Begin a write transaction
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`) so a flush never
    /// fails halfway through on lock upgrade. Dropping the handle without
    /// calling `commit` rolls everything back.
    pub fn transaction(&self) -> Result<IntervalTx, StoreError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(IntervalTx {
            conn,
            finished: false,
        })
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        Ok(migrations::current_version(&conn)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // One-shot helpers (each opens and commits its own transaction)
    // ─────────────────────────────────────────────────────────────────────────

    pub fn append(&self, entry: &TimeEntry) -> Result<i64, StoreError> {
        let tx = self.transaction()?;
        let id = tx.append(entry)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn update_last_to_timestamp(&self, category: Category, to: i64) -> Result<(), StoreError> {
        let tx = self.transaction()?;
        tx.update_last_to_timestamp(category, to)?;
        tx.commit()
    }

    pub fn get_last(&self, category: Category) -> Result<Option<StoredEntry>, StoreError> {
        let conn = self.conn()?;
        get_last(&conn, category)
    }

    pub fn query(&self, category: Category, from: i64, to: i64) -> Result<Vec<TimeEntry>, StoreError> {
        let conn = self.conn()?;
        query(&conn, category, from, to)
    }

    pub fn generation(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        generation(&conn)
    }

    pub fn set_generation(&self, value: i64) -> Result<(), StoreError> {
        let tx = self.transaction()?;
        tx.set_generation(value)?;
        tx.commit()
    }
}

/// One write transaction on the interval store
pub struct IntervalTx {
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl IntervalTx {
    /// Append a new entry; returns its row id
    pub fn append(&self, entry: &TimeEntry) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (from_timestamp, origin, to_timestamp, generation) VALUES (?1, ?2, ?3, ?4)",
            entry.category.table()
        );
        self.conn.prepare_cached(&sql)?.execute(params![
            entry.from_timestamp,
            entry.origin,
            entry.to_timestamp,
            entry.generation,
        ])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Move `to_timestamp` of the most recently inserted row in `category`
    pub fn update_last_to_timestamp(&self, category: Category, to: i64) -> Result<(), StoreError> {
        let table = category.table();
        let sql = format!(
            "UPDATE {table} SET to_timestamp = ?1 WHERE id = (SELECT MAX(id) FROM {table})"
        );
        let changed = self.conn.prepare_cached(&sql)?.execute(params![to])?;
        if changed == 0 {
            return Err(StoreError::NoEntry(category));
        }
        Ok(())
    }

    pub fn get_last(&self, category: Category) -> Result<Option<StoredEntry>, StoreError> {
        get_last(&self.conn, category)
    }

    pub fn query(&self, category: Category, from: i64, to: i64) -> Result<Vec<TimeEntry>, StoreError> {
        query(&self.conn, category, from, to)
    }

    pub fn generation(&self) -> Result<i64, StoreError> {
        generation(&self.conn)
    }

    pub fn set_generation(&self, value: i64) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO daemon_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![GENERATION_KEY, value])?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for IntervalTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!("Failed to roll back interval store transaction: {}", e);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared read helpers
// ─────────────────────────────────────────────────────────────────────────────

fn row_to_entry(category: Category, row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        category,
        from_timestamp: row.get("from_timestamp")?,
        origin: row.get("origin")?,
        to_timestamp: row.get("to_timestamp")?,
        generation: row.get("generation")?,
    })
}

fn get_last(
    conn: &rusqlite::Connection,
    category: Category,
) -> Result<Option<StoredEntry>, StoreError> {
    let sql = format!(
        "SELECT id, from_timestamp, origin, to_timestamp, generation
         FROM {} ORDER BY id DESC LIMIT 1",
        category.table()
    );
    let last = conn
        .prepare_cached(&sql)?
        .query_row([], |row| {
            Ok(StoredEntry {
                id: row.get("id")?,
                entry: row_to_entry(category, row)?,
            })
        })
        .optional()?;
    Ok(last)
}

fn query(
    conn: &rusqlite::Connection,
    category: Category,
    from: i64,
    to: i64,
) -> Result<Vec<TimeEntry>, StoreError> {
    let sql = format!(
        "SELECT from_timestamp, origin, to_timestamp, generation
         FROM {} WHERE from_timestamp >= ?1 AND from_timestamp < ?2 ORDER BY id",
        category.table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let entries = stmt
        .query_map(params![from, to], |row| row_to_entry(category, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn generation(conn: &rusqlite::Connection) -> Result<i64, StoreError> {
    let value: Option<i64> = conn
        .prepare_cached("SELECT value FROM daemon_state WHERE key = ?1")?
        .query_row(params![GENERATION_KEY], |row| row.get(0))
        .optional()?;
    Ok(value.unwrap_or(0))
}

/// Fresh store in a temporary directory; keep the `TempDir` alive while in use
#[cfg(test)]
pub(crate) fn temp_store() -> (tempfile::TempDir, IntervalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        IntervalStore::open(dir.path().join("attentd.db"), &StoreOptions::default()).unwrap();
    (dir, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OPEN_END;

    fn entry(category: Category, origin: &str, from: i64, to: i64) -> TimeEntry {
        TimeEntry {
            category,
            origin: origin.to_string(),
            from_timestamp: from,
            to_timestamp: to,
            generation: 0,
        }
    }

    #[test]
    fn test_open_creates_directory_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("attentd.db");

        let store = IntervalStore::open(&path, &StoreOptions::default()).unwrap();

        assert!(path.exists());
        assert_eq!(store.schema_version().unwrap(), 3);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attentd.db");
        let store = IntervalStore::open(&path, &StoreOptions::default()).unwrap();
        store.append(&entry(Category::Desktop, "A", 1000, 2000)).unwrap();
        drop(store);

        let store = IntervalStore::open(&path, &StoreOptions::default()).unwrap();

        assert_eq!(store.schema_version().unwrap(), 3);
        assert_eq!(store.query(Category::Desktop, 0, i64::MAX).unwrap().len(), 1);
    }

    #[test]
    fn test_get_last_on_empty_table_is_none() {
        let (_dir, store) = temp_store();
        assert!(store.get_last(Category::Desktop).unwrap().is_none());
        assert!(store.query(Category::Browser, 0, i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_update_last_on_empty_table_errors() {
        let (_dir, store) = temp_store();
        let err = store
            .update_last_to_timestamp(Category::Browser, 5000)
            .unwrap_err();
        assert!(matches!(err, StoreError::NoEntry(Category::Browser)));
    }

    #[test]
    fn test_get_last_follows_insertion_order() {
        let (_dir, store) = temp_store();
        store.append(&entry(Category::Desktop, "late", 9000, 9500)).unwrap();
        let id = store.append(&entry(Category::Desktop, "early", 100, OPEN_END)).unwrap();

        let last = store.get_last(Category::Desktop).unwrap().unwrap();

        assert_eq!(last.id, id);
        assert_eq!(last.entry.origin, "early");
        assert!(last.entry.is_open());
    }

    #[test]
    fn test_update_only_touches_latest_row() {
        let (_dir, store) = temp_store();
        store.append(&entry(Category::Desktop, "A", 1000, 2000)).unwrap();
        store.append(&entry(Category::Desktop, "B", 2000, OPEN_END)).unwrap();

        store.update_last_to_timestamp(Category::Desktop, 3000).unwrap();

        let rows = store.query(Category::Desktop, 0, i64::MAX).unwrap();
        assert_eq!(rows[0].to_timestamp, 2000);
        assert_eq!(rows[1].to_timestamp, 3000);
    }

    #[test]
    fn test_categories_are_isolated() {
        let (_dir, store) = temp_store();
        store.append(&entry(Category::Desktop, "code", 1000, OPEN_END)).unwrap();
        store.append(&entry(Category::Browser, "example.com", 1000, OPEN_END)).unwrap();

        store.update_last_to_timestamp(Category::Browser, 1500).unwrap();

        assert!(store.get_last(Category::Desktop).unwrap().unwrap().entry.is_open());
        assert_eq!(
            store.get_last(Category::Browser).unwrap().unwrap().entry.to_timestamp,
            1500
        );
    }

    #[test]
    fn test_query_window_is_half_open_on_start() {
        let (_dir, store) = temp_store();
        for (origin, from) in [("a", 100), ("b", 200), ("c", 300)] {
            store.append(&entry(Category::Desktop, origin, from, from + 100)).unwrap();
        }

        let rows = store.query(Category::Desktop, 200, 300).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].origin, "b");
    }

    #[test]
    fn test_round_trip_query_returns_exact_rows() {
        let (_dir, store) = temp_store();
        let written = vec![
            entry(Category::Browser, "a.com", 1000, 1800),
            entry(Category::Browser, "b.com", 1800, 2600),
            TimeEntry {
                generation: 4,
                ..entry(Category::Browser, "a.com", 2600, OPEN_END)
            },
        ];
        for e in &written {
            store.append(e).unwrap();
        }

        assert_eq!(store.query(Category::Browser, 0, i64::MAX).unwrap(), written);
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let (_dir, store) = temp_store();
        {
            let tx = store.transaction().unwrap();
            tx.append(&entry(Category::Desktop, "A", 1000, OPEN_END)).unwrap();
            tx.set_generation(7).unwrap();
        }

        assert!(store.get_last(Category::Desktop).unwrap().is_none());
        assert_eq!(store.generation().unwrap(), 0);
    }

    #[test]
    fn test_generation_defaults_to_zero_and_persists() {
        let (_dir, store) = temp_store();
        assert_eq!(store.generation().unwrap(), 0);

        store.set_generation(1).unwrap();
        store.set_generation(2).unwrap();

        assert_eq!(store.generation().unwrap(), 2);
    }

    #[test]
    fn test_open_rejects_store_from_newer_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attentd.db");
        IntervalStore::open(&path, &StoreOptions::default()).unwrap();

        let older = Migrator::new(migrations::MIGRATIONS[..2].iter().copied());
        let err = IntervalStore::open_with(&path, &StoreOptions::default(), &older).unwrap_err();

        assert!(matches!(
            err,
            StoreError::Migration(MigrationError::NewerThanSupported { .. })
        ));
    }
}
