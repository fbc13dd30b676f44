//! Liveness marker for restart detection
//!
//! While the daemon runs, `<data_dir>/attentd.run` holds a small JSON record
//! that is rewritten on every heartbeat. A clean shutdown removes it. Finding
//! the file at startup therefore means the previous run died without
//! flushing, and its last heartbeat is the best estimate of when tracking
//! actually stopped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::now_millis;

/// File name of the marker inside the data directory
pub const MARKER_FILE: &str = "attentd.run";

/// How the previous daemon run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorShutdown {
    /// No marker found: the last run flushed and released its marker
    Clean,
    /// Marker left behind; `last_heartbeat_ms` is `None` if it was unreadable
    Unclean { last_heartbeat_ms: Option<i64> },
}

impl PriorShutdown {
    pub fn is_clean(&self) -> bool {
        matches!(self, PriorShutdown::Clean)
    }

    pub fn last_heartbeat(&self) -> Option<i64> {
        match self {
            PriorShutdown::Clean => None,
            PriorShutdown::Unclean { last_heartbeat_ms } => *last_heartbeat_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MarkerRecord {
    pid: u32,
    started_at: i64,
    heartbeat_at: i64,
}

/// Marker owned by the running daemon
#[derive(Debug)]
pub struct RunMarker {
    path: PathBuf,
    pid: u32,
    started_at: i64,
}

impl RunMarker {
    /// Inspect any marker left by a previous run, then claim the marker
    pub fn acquire(data_dir: &Path) -> Result<(Self, PriorShutdown)> {
        Self::acquire_at(data_dir, now_millis())
    }

    pub fn acquire_at(data_dir: &Path, now: i64) -> Result<(Self, PriorShutdown)> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let path = data_dir.join(MARKER_FILE);
        let prior = read_prior(&path);

        let marker = Self {
            path,
            pid: std::process::id(),
            started_at: now,
        };
        marker.heartbeat_at(now)?;

        Ok((marker, prior))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn heartbeat(&self) -> Result<()> {
        self.heartbeat_at(now_millis())
    }

    /// Rewrite the marker with a new heartbeat timestamp
    ///
    /// Written to a sibling temp file and renamed into place, so a crash
    /// mid-write never leaves a truncated marker behind.
    pub fn heartbeat_at(&self, now: i64) -> Result<()> {
        let record = MarkerRecord {
            pid: self.pid,
            started_at: self.started_at,
            heartbeat_at: now,
        };
        let json = serde_json::to_string(&record).context("Failed to serialize liveness marker")?;

        let tmp = self.path.with_extension("run.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write liveness marker {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace liveness marker {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the marker; the next start will see a clean shutdown
    pub fn release(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove liveness marker {}", self.path.display())),
        }
    }
}

fn read_prior(path: &Path) -> PriorShutdown {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PriorShutdown::Clean,
        Err(e) => {
            tracing::warn!("Liveness marker {} unreadable: {}", path.display(), e);
            return PriorShutdown::Unclean {
                last_heartbeat_ms: None,
            };
        }
    };

    match serde_json::from_str::<MarkerRecord>(&contents) {
        Ok(record) => {
            tracing::warn!(
                pid = record.pid,
                heartbeat_at = record.heartbeat_at,
                "Previous run did not shut down cleanly"
            );
            PriorShutdown::Unclean {
                last_heartbeat_ms: Some(record.heartbeat_at),
            }
        }
        Err(e) => {
            tracing::warn!("Liveness marker {} is corrupt: {}", path.display(), e);
            PriorShutdown::Unclean {
                last_heartbeat_ms: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_start_is_clean() {
        let dir = tempfile::tempdir().unwrap();

        let (marker, prior) = RunMarker::acquire_at(dir.path(), 1000).unwrap();

        assert_eq!(prior, PriorShutdown::Clean);
        assert!(marker.path().exists());
    }

    #[test]
    fn test_released_marker_gives_clean_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (marker, _) = RunMarker::acquire_at(dir.path(), 1000).unwrap();
        marker.release().unwrap();

        let (_marker, prior) = RunMarker::acquire_at(dir.path(), 2000).unwrap();

        assert!(prior.is_clean());
    }

    #[test]
    fn test_abandoned_marker_reports_last_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let (marker, _) = RunMarker::acquire_at(dir.path(), 1000).unwrap();
        marker.heartbeat_at(4500).unwrap();
        drop(marker);

        let (_marker, prior) = RunMarker::acquire_at(dir.path(), 9000).unwrap();

        assert_eq!(
            prior,
            PriorShutdown::Unclean {
                last_heartbeat_ms: Some(4500)
            }
        );
        assert_eq!(prior.last_heartbeat(), Some(4500));
    }

    #[test]
    fn test_corrupt_marker_is_unclean_without_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MARKER_FILE), "{not json").unwrap();

        let (_marker, prior) = RunMarker::acquire_at(dir.path(), 1000).unwrap();

        assert_eq!(
            prior,
            PriorShutdown::Unclean {
                last_heartbeat_ms: None
            }
        );
    }

    #[test]
    fn test_heartbeat_rewrites_record() {
        let dir = tempfile::tempdir().unwrap();
        let (marker, _) = RunMarker::acquire_at(dir.path(), 1000).unwrap();

        marker.heartbeat_at(7000).unwrap();

        let record: MarkerRecord =
            serde_json::from_str(&std::fs::read_to_string(marker.path()).unwrap()).unwrap();
        assert_eq!(record.started_at, 1000);
        assert_eq!(record.heartbeat_at, 7000);
        assert_eq!(record.pid, std::process::id());
    }

    #[test]
    fn test_release_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let (marker, _) = RunMarker::acquire_at(dir.path(), 1000).unwrap();
        std::fs::remove_file(marker.path()).unwrap();

        assert!(marker.release().is_ok());
    }
}
