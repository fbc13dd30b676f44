//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

impl Config {
    /// Render the config as a commented TOML file
    ///
    /// Paths use TOML literal strings so Windows separators survive.
    pub fn to_toml(&self) -> String {
        let db_path = match &self.storage.db_path {
            Some(path) => format!("db_path = '{}'\n", path.display()),
            None => "# db_path = '/path/to/attentd.db'  # default: <data_dir>/attentd.db\n"
                .to_string(),
        };

        format!(
            r#"# attentd configuration
#
# Environment variables override this file:
#   ATTENTD_BIND, ATTENTD_DATA_DIR, ATTENTD_DB_PATH, ATTENTD_FLUSH_THRESHOLD

# HTTP address sensors send pings to
bind_addr = "{bind}"

# Database and liveness marker location
data_dir = '{data_dir}'

# Ping buffering and coalescing
[tracker]
# Pings queued per category before they are written (minimum 1)
flush_threshold = {flush_threshold}
# Largest gap (ms) across which a finished interval of the same origin is continued
merge_gap_ms = {merge_gap_ms}
# How often the liveness marker is refreshed (seconds)
heartbeat_interval_secs = {heartbeat}

# SQLite interval store
[storage]
{db_path}pool_size = {pool_size}
busy_timeout_ms = {busy_timeout}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
# JSON file logging (in addition to stdout)
file_enabled = {log_file_enabled}
file_dir = '{log_file_dir}'
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = "{log_file_prefix}"
"#,
            bind = self.bind_addr,
            data_dir = self.data_dir.display(),
            flush_threshold = self.tracker.flush_threshold,
            merge_gap_ms = self.tracker.merge_gap_ms,
            heartbeat = self.tracker.heartbeat_interval_secs,
            db_path = db_path,
            pool_size = self.storage.pool_size,
            busy_timeout = self.storage.busy_timeout_ms,
            log_level = self.logging.level,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = self.logging.file_dir.display(),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = self.logging.file_prefix,
        )
    }
}
