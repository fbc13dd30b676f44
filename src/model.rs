// Core data types shared by the tracker, the interval store and the HTTP layer
//
// Pings are what sensors report; time entries are what gets persisted. The
// category set is closed: every variant maps to exactly one table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `to_timestamp` value marking an entry whose end is not known yet
pub const OPEN_END: i64 = 0;

/// Tracked activity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Focused desktop application (origin = executable path or name)
    Desktop,
    /// Focused browser tab (origin = hostname)
    Browser,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Desktop, Category::Browser];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Desktop => "desktop",
            Category::Browser => "browser",
        }
    }

    /// Table holding this category's time entries
    pub fn table(self) -> &'static str {
        match self {
            Category::Desktop => "desktop_time_entry",
            Category::Browser => "browser_time_entry",
        }
    }

    /// Dense index for per-category arrays
    pub(crate) fn index(self) -> usize {
        match self {
            Category::Desktop => 0,
            Category::Browser => 1,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a category name is not in the closed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Category::Desktop),
            "browser" => Ok(Category::Browser),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// A sensor observation: `origin` held attention in `category` at `timestamp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    /// Milliseconds since the Unix epoch, as read by the sensor
    pub timestamp: i64,
    pub category: Category,
    pub origin: String,
}

impl Ping {
    pub fn new(category: Category, origin: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            category,
            origin: origin.into(),
        }
    }
}

impl fmt::Display for Ping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ping from {} @{}", self.category, self.origin, self.timestamp)
    }
}

/// An interval during which one origin held attention within one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub category: Category,
    pub origin: String,
    pub from_timestamp: i64,
    /// `OPEN_END` while the interval is still running
    pub to_timestamp: i64,
    /// Daemon run that produced this entry
    pub generation: i64,
}

impl TimeEntry {
    pub fn is_open(&self) -> bool {
        self.to_timestamp == OPEN_END
    }

    /// Stored duration, or `None` for an open entry
    pub fn duration_ms(&self) -> Option<i64> {
        (!self.is_open()).then(|| self.to_timestamp - self.from_timestamp)
    }
}

impl fmt::Display for TimeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            write!(
                f,
                "{}:{} [{}, open) gen {}",
                self.category, self.origin, self.from_timestamp, self.generation
            )
        } else {
            write!(
                f,
                "{}:{} [{}, {}) gen {}",
                self.category, self.origin, self.from_timestamp, self.to_timestamp, self.generation
            )
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn test_category_rejects_unknown() {
        let err = "mobile".parse::<Category>().unwrap_err();
        assert_eq!(err, UnknownCategory("mobile".to_string()));
        // Matching is exact, not case-folded
        assert!("Desktop".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_tables_are_distinct() {
        assert_eq!(Category::Desktop.table(), "desktop_time_entry");
        assert_eq!(Category::Browser.table(), "browser_time_entry");
    }

    #[test]
    fn test_open_entry_has_no_duration() {
        let mut entry = TimeEntry {
            category: Category::Desktop,
            origin: "A".to_string(),
            from_timestamp: 1000,
            to_timestamp: OPEN_END,
            generation: 0,
        };
        assert!(entry.is_open());
        assert_eq!(entry.duration_ms(), None);

        entry.to_timestamp = 1500;
        assert_eq!(entry.duration_ms(), Some(500));
    }
}
