// Logging module - tracing subscriber setup
//
// Stdout always gets a human-readable fmt layer. When file logging is
// enabled, a JSON layer writes to a rotating file through a non-blocking
// writer. The returned guard must be held until exit or buffered lines are
// lost.
//
// Precedence for the filter: RUST_LOG env var > config file > default "info"

use crate::config::{LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is not set
pub fn default_filter(level: &str) -> String {
    format!("attentd={},tower_http=info,axum=info", level)
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.level).into());

    let (file_layer, guard) = if config.file_enabled {
        match file_appender(config) {
            Ok(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                // Fall back to stdout only
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.file_dir, e
                );
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Create the rolling file appender for the configured rotation
fn file_appender(config: &LoggingConfig) -> std::io::Result<RollingFileAppender> {
    std::fs::create_dir_all(&config.file_dir)?;

    let appender = match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, &config.file_prefix),
    };
    Ok(appender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_uses_configured_level() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("attentd=debug"));
        assert!(filter.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_enabled: true,
            file_dir: dir.path().join("logs"),
            file_rotation: LogRotation::Never,
            ..Default::default()
        };

        file_appender(&config).unwrap();

        assert!(config.file_dir.is_dir());
    }
}
