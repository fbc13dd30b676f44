//! Tracker and storage configuration
//!
//! - `[tracker]`: flush threshold, merge gap, liveness heartbeat
//! - `[storage]`: database location and connection pool tuning

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreOptions;
use crate::tracker::{TrackerConfig, DEFAULT_FLUSH_THRESHOLD, DEFAULT_MERGE_GAP_MS};

// ─────────────────────────────────────────────────────────────────────────────
// Tracker Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tracker settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Queued pings per category before a flush (minimum 1)
    pub flush_threshold: usize,
    /// Largest gap (ms) across which a closed interval of the same origin is extended
    pub merge_gap_ms: i64,
    /// How often the liveness marker is rewritten (seconds)
    pub heartbeat_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            merge_gap_ms: DEFAULT_MERGE_GAP_MS,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Tracker settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileTracking {
    pub flush_threshold: Option<usize>,
    pub merge_gap_ms: Option<i64>,
    pub heartbeat_interval_secs: Option<u64>,
}

impl TrackingConfig {
    /// Create from file config with defaults
    ///
    /// `flush_threshold_override` comes from the environment and wins over the file.
    pub fn from_file(file: Option<FileTracking>, flush_threshold_override: Option<usize>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            flush_threshold: flush_threshold_override
                .or(file.flush_threshold)
                .unwrap_or(defaults.flush_threshold)
                .max(1),
            merge_gap_ms: file
                .merge_gap_ms
                .unwrap_or(defaults.merge_gap_ms)
                .max(0),
            heartbeat_interval_secs: file
                .heartbeat_interval_secs
                .unwrap_or(defaults.heartbeat_interval_secs)
                .max(1),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            flush_threshold: self.flush_threshold,
            merge_gap_ms: self.merge_gap_ms,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Interval store settings
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Explicit database path; `None` means `<data_dir>/attentd.db`
    pub db_path: Option<PathBuf>,
    /// Maximum pooled SQLite connections
    pub pool_size: u32,
    /// SQLite busy timeout (milliseconds)
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

/// Storage settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileStorage {
    pub db_path: Option<String>,
    pub pool_size: Option<u32>,
    pub busy_timeout_ms: Option<u64>,
}

impl StorageConfig {
    /// Create from file config with defaults
    ///
    /// `db_path_override` comes from the environment and wins over the file.
    pub fn from_file(file: Option<FileStorage>, db_path_override: Option<String>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            db_path: db_path_override
                .or(file.db_path)
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.db_path),
            pool_size: file.pool_size.unwrap_or(defaults.pool_size).max(1),
            busy_timeout_ms: file.busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            pool_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}
