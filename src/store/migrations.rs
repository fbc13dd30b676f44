//! Versioned schema migrations for the interval store
//!
//! The store records a single integer in `schema_version`. Migration `n`
//! takes the schema from version `n` to `n + 1`, so the latest version is
//! always `max(registered index) + 1`. Steps are additive only: new tables,
//! new columns, new indexes. Historical rows are never rewritten.
//!
//! All pending steps and the final version write share one transaction, so
//! a failure anywhere leaves the store exactly at the version it started
//! from and the next startup retries the whole batch.

use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;

/// One schema step, applied when upgrading from `version` to `version + 1`
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Steps shipped with this build, in any order (the migrator sorts them)
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 0,
        description: "version record and per-category entry tables",
        statements: &[
            "CREATE TABLE schema_version (v INTEGER NOT NULL)",
            "INSERT INTO schema_version (v) VALUES (0)",
            r#"CREATE TABLE desktop_time_entry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_timestamp INTEGER NOT NULL,
                origin TEXT NOT NULL,
                to_timestamp INTEGER NOT NULL DEFAULT 0,
                generation INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE browser_time_entry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_timestamp INTEGER NOT NULL,
                origin TEXT NOT NULL,
                to_timestamp INTEGER NOT NULL DEFAULT 0,
                generation INTEGER NOT NULL DEFAULT 0
            )"#,
        ],
    },
    Migration {
        version: 1,
        description: "range query indexes",
        statements: &[
            "CREATE INDEX idx_desktop_time_entry_from ON desktop_time_entry(from_timestamp)",
            "CREATE INDEX idx_browser_time_entry_from ON browser_time_entry(from_timestamp)",
        ],
    },
    Migration {
        version: 2,
        description: "daemon state (generation counter)",
        statements: &["CREATE TABLE daemon_state (key TEXT PRIMARY KEY, value INTEGER NOT NULL)"],
    },
];

/// Reasons the store cannot be brought to the latest schema
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no schema migrations are registered")]
    NoMigrations,

    #[error("schema migration for version {version} is undefined")]
    Missing { version: u32 },

    #[error("database schema version ({found}) is newer than supported schema ({latest})")]
    NewerThanSupported { found: u32, latest: u32 },

    #[error("migration from version {version} failed: {source}")]
    Step {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to read or write schema version: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result of a successful `migrate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: u32,
    pub to_version: u32,
}

impl MigrationOutcome {
    pub fn applied(&self) -> u32 {
        self.to_version - self.from_version
    }
}

/// Applies registered migrations exactly once each, in ascending order
#[derive(Debug, Clone)]
pub struct Migrator {
    steps: BTreeMap<u32, Migration>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MIGRATIONS.iter().copied())
    }
}

impl Migrator {
    pub fn new(steps: impl IntoIterator<Item = Migration>) -> Self {
        Self {
            steps: steps.into_iter().map(|m| (m.version, m)).collect(),
        }
    }

    /// Version a fully migrated store reports
    pub fn latest_version(&self) -> Option<u32> {
        self.steps.keys().next_back().map(|v| v + 1)
    }

    /// Bring `conn` to the latest schema version
    pub fn migrate(&self, conn: &mut Connection) -> Result<MigrationOutcome, MigrationError> {
        let latest = self.latest_version().ok_or(MigrationError::NoMigrations)?;
        let current = current_version(conn)?;

        if current == latest {
            tracing::debug!("Already on latest schema version {}", latest);
            return Ok(MigrationOutcome {
                from_version: current,
                to_version: latest,
            });
        }

        if current > latest {
            return Err(MigrationError::NewerThanSupported {
                found: current,
                latest,
            });
        }

        // Refuse to touch the store unless the whole chain is known
        if let Some(version) = (current..latest).find(|v| !self.steps.contains_key(v)) {
            return Err(MigrationError::Missing { version });
        }

        let tx = conn.transaction()?;
        for version in current..latest {
            let step = &self.steps[&version];
            tracing::info!(
                "Executing schema migration for version {} ({})",
                version,
                step.description
            );
            for statement in step.statements {
                tx.execute_batch(statement)
                    .map_err(|source| MigrationError::Step { version, source })?;
            }
        }
        tx.execute("UPDATE schema_version SET v = ?1", [latest])?;
        tx.commit()?;

        tracing::info!("Migrated interval store from v{} to v{}", current, latest);
        Ok(MigrationOutcome {
            from_version: current,
            to_version: latest,
        })
    }
}

/// Schema version recorded in the store, 0 for a brand-new database
pub fn current_version(conn: &Connection) -> Result<u32, rusqlite::Error> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row("SELECT v FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or(0))
}
