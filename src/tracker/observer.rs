//! Flush decision trail
//!
//! Every reconciliation decision a flush makes is reported as a
//! `FlushEvent` after the flush transaction commits. Observers are pure
//! side effects: they cannot veto or alter a flush, and nothing is delivered
//! for a flush that rolled back.
//!
//! ```text
//! Tracker::flush → commit → [Observer₁, Observer₂, ...]
//! ```

use crate::model::{Category, TimeEntry};

/// Why an open interval was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Next interval belongs to another origin
    OriginChanged,
    /// Interval was left open by a previous daemon run
    GenerationBoundary,
    /// Final flush at shutdown
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::OriginChanged => "origin_changed",
            CloseReason::GenerationBoundary => "generation_boundary",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// A single decision taken by a committed flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEvent {
    /// The last persisted interval was extended to `to` (possibly reopened)
    Merged {
        category: Category,
        origin: String,
        from: i64,
        to: i64,
    },
    /// The last persisted interval was closed at `at`
    Closed {
        category: Category,
        origin: String,
        from: i64,
        at: i64,
        reason: CloseReason,
    },
    /// A new interval was appended
    Inserted { entry: TimeEntry },
    /// Pings older than the persisted floor were dropped
    Discarded {
        category: Category,
        count: usize,
        floor: i64,
    },
}

impl FlushEvent {
    pub fn category(&self) -> Category {
        match self {
            FlushEvent::Merged { category, .. }
            | FlushEvent::Closed { category, .. }
            | FlushEvent::Discarded { category, .. } => *category,
            FlushEvent::Inserted { entry } => entry.category,
        }
    }
}

/// Receives flush decisions
///
/// `on_event` is called synchronously on the flushing thread while the
/// category lock is still held, so implementations must stay cheap and must
/// not call back into the tracker.
pub trait FlushObserver: Send + Sync {
    /// Human-readable name for logging and debugging
    fn name(&self) -> &'static str;

    fn on_event(&self, event: &FlushEvent);
}

/// Writes every flush decision through `tracing`
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushObserver for LoggingObserver {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn on_event(&self, event: &FlushEvent) {
        match event {
            FlushEvent::Merged {
                category,
                origin,
                from,
                to,
            } => tracing::debug!(
                observer = self.name(),
                category = %category,
                origin = %origin,
                from,
                to,
                "Extended last interval"
            ),
            FlushEvent::Closed {
                category,
                origin,
                from,
                at,
                reason,
            } => tracing::debug!(
                observer = self.name(),
                category = %category,
                origin = %origin,
                from,
                at,
                reason = reason.as_str(),
                "Closed last interval"
            ),
            FlushEvent::Inserted { entry } => tracing::trace!(
                observer = self.name(),
                category = %entry.category,
                origin = %entry.origin,
                from = entry.from_timestamp,
                to = entry.to_timestamp,
                duration_ms = ?entry.duration_ms(),
                generation = entry.generation,
                "Inserted interval"
            ),
            FlushEvent::Discarded {
                category,
                count,
                floor,
            } => tracing::warn!(
                observer = self.name(),
                category = %category,
                count,
                floor,
                "Discarded pings older than the last persisted interval"
            ),
        }
    }
}

/// Collects events in memory for assertions
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<FlushEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<FlushEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl FlushObserver for RecordingObserver {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn on_event(&self, event: &FlushEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category() {
        let event = FlushEvent::Inserted {
            entry: TimeEntry {
                category: Category::Browser,
                origin: "example.com".into(),
                from_timestamp: 1,
                to_timestamp: 0,
                generation: 0,
            },
        };
        assert_eq!(event.category(), Category::Browser);

        let event = FlushEvent::Discarded {
            category: Category::Desktop,
            count: 2,
            floor: 100,
        };
        assert_eq!(event.category(), Category::Desktop);
    }

    #[test]
    fn test_logging_observer_handles_every_event() {
        let observer = LoggingObserver::new();
        assert_eq!(observer.name(), "logging");
        observer.on_event(&FlushEvent::Closed {
            category: Category::Desktop,
            origin: "A".into(),
            from: 1000,
            at: 2000,
            reason: CloseReason::Shutdown,
        });
        observer.on_event(&FlushEvent::Merged {
            category: Category::Desktop,
            origin: "A".into(),
            from: 1000,
            to: 0,
        });
    }
}
