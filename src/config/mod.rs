//! Configuration for the tracking daemon
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/attentd/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod serialization;
mod tracking;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use tracking::{FileStorage, FileTracking, StorageConfig, TrackingConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port sensors talk to
pub const DEFAULT_PORT: u16 = 16789;

/// Database file name inside the data directory
pub const DB_FILE: &str = "attentd.db";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP ingestion/reporting server binds to
    pub bind_addr: SocketAddr,

    /// Directory holding the database and the liveness marker
    pub data_dir: PathBuf,

    /// Ping buffering and coalescing
    pub tracker: TrackingConfig,

    /// Interval store location and pool tuning
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            data_dir: default_data_dir(),
            tracker: TrackingConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("attentd"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub data_dir: Option<String>,

    /// Optional [tracker] section
    pub tracker: Option<FileTracking>,

    /// Optional [storage] section
    pub storage: Option<FileStorage>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/attentd/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("attentd").join("config.toml"))
    }

    /// Database file: `[storage].db_path` if set, else inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DB_FILE))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        // Config is optional, so failures here are silent
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Write the default template to `path`, replacing any existing file
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, Self::default().to_toml())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Parse config file contents
    pub(crate) fn parse_file_config(contents: &str) -> Result<FileConfig, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load file config if it exists
    ///
    /// Exits the process if the file exists but cannot be read or parsed: a
    /// broken config should fail fast with a clear error, not silently fall
    /// back to defaults.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match Self::parse_file_config(&contents) {
                Ok(config) => config,
                Err(e) => {
                    config_error_box("Failed to parse configuration file", &path, &e);
                    eprintln!("  Tip: Check for:\n");
                    eprintln!("    - Missing quotes around string values");
                    eprintln!("    - Invalid boolean values (use true/false)");
                    eprintln!("    - Typos in section or key names\n");
                    eprintln!("  To reset, run `attentd config --reset`.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                config_error_box("Cannot read configuration file", &path, &e);
                std::process::exit(1);
            }
        }
    }

    /// Load configuration: env vars > file > defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        match Self::resolve(file, |key| std::env::var(key).ok()) {
            Ok(config) => config,
            Err(e) => {
                let path = Self::config_path().unwrap_or_default();
                config_error_box("Invalid configuration value", &path, &format!("{:#}", e));
                std::process::exit(1);
            }
        }
    }

    /// Merge file settings and environment lookups over the defaults
    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        // Bind address: env > file > default
        let bind_addr = match env("ATTENTD_BIND").or(file.bind_addr) {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid bind address '{}'", addr))?,
            None => defaults.bind_addr,
        };

        // Data directory: env > file > default
        let data_dir = env("ATTENTD_DATA_DIR")
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        // Flush threshold: env > file > default
        let flush_threshold = match env("ATTENTD_FLUSH_THRESHOLD") {
            Some(v) => Some(
                v.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid ATTENTD_FLUSH_THRESHOLD '{}'", v))?,
            ),
            None => None,
        };

        // Subconfig loading with from_file() helpers
        let tracker = TrackingConfig::from_file(file.tracker, flush_threshold);
        let storage = StorageConfig::from_file(file.storage, env("ATTENTD_DB_PATH"));
        let logging = LoggingConfig::from_file(file.logging);

        Ok(Self {
            bind_addr,
            data_dir,
            tracker,
            storage,
            logging,
        })
    }
}

fn config_error_box(title: &str, path: &Path, error: &dyn std::fmt::Display) {
    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║  CONFIG ERROR - {:<45}║", title);
    eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
    eprintln!("  File: {}\n", path.display());
    eprintln!("  Error: {}\n", error);
}
