//! Read-side queries over the interval store
//!
//! Used by the HTTP reporting routes. Reads go through the shared pool and
//! never block a flush (WAL mode).

use super::{IntervalStore, StoreError};
use crate::model::{Category, OPEN_END};
use serde::Serialize;
use std::collections::BTreeMap;

/// A reported interval; `to == 0` means the interval is still ongoing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub from: i64,
    pub to: i64,
    pub origin: String,
}

impl Interval {
    pub fn is_ongoing(&self) -> bool {
        self.to == OPEN_END
    }
}

/// Query interface for reporting
#[derive(Debug, Clone)]
pub struct IntervalQuery {
    store: IntervalStore,
}

impl IntervalQuery {
    pub fn new(store: IntervalStore) -> Self {
        Self { store }
    }

    /// Intervals whose start falls in `[from, to)`, in insertion order
    pub fn intervals(
        &self,
        category: Category,
        from: i64,
        to: i64,
    ) -> Result<Vec<Interval>, StoreError> {
        let intervals = self
            .store
            .query(category, from, to)?
            .into_iter()
            .map(|e| Interval {
                from: e.from_timestamp,
                to: e.to_timestamp,
                origin: e.origin,
            })
            .collect();
        Ok(intervals)
    }

    /// Total attention time per origin for intervals starting in `[from, to)`
    ///
    /// `to` is clamped to `now` first. Ongoing intervals are counted up to the
    /// clamped `to`. Every interval contributes at least 1 ms, so an origin
    /// that was seen always shows up with a non-zero total.
    pub fn usage_by_origin(
        &self,
        category: Category,
        from: i64,
        to: i64,
        now: i64,
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let to = to.min(now);
        let mut usage = BTreeMap::new();

        for interval in self.intervals(category, from, to)? {
            let end = if interval.is_ongoing() { to } else { interval.to };
            let duration = (end - interval.from).max(1);
            *usage.entry(interval.origin).or_insert(0) += duration;
        }

        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeEntry;
    use crate::store::temp_store;

    fn seed(store: &IntervalStore, rows: &[(&str, i64, i64)]) {
        for (origin, from, to) in rows {
            store
                .append(&TimeEntry {
                    category: Category::Desktop,
                    origin: origin.to_string(),
                    from_timestamp: *from,
                    to_timestamp: *to,
                    generation: 0,
                })
                .unwrap();
        }
    }

    #[test]
    fn test_intervals_report_ongoing_tail() {
        let (_dir, store) = temp_store();
        seed(&store, &[("A", 1000, 2000), ("B", 2000, OPEN_END)]);
        let query = IntervalQuery::new(store);

        let intervals = query.intervals(Category::Desktop, 0, 10_000).unwrap();

        assert_eq!(
            intervals,
            vec![
                Interval { from: 1000, to: 2000, origin: "A".into() },
                Interval { from: 2000, to: 0, origin: "B".into() },
            ]
        );
        assert!(intervals[1].is_ongoing());
    }

    #[test]
    fn test_usage_sums_per_origin() {
        let (_dir, store) = temp_store();
        seed(
            &store,
            &[("A", 1000, 2000), ("B", 2000, 2500), ("A", 2500, 4000)],
        );
        let query = IntervalQuery::new(store);

        let usage = query
            .usage_by_origin(Category::Desktop, 0, 10_000, 10_000)
            .unwrap();

        assert_eq!(usage.get("A"), Some(&2500));
        assert_eq!(usage.get("B"), Some(&500));
    }

    #[test]
    fn test_usage_ends_ongoing_interval_at_clamped_to() {
        let (_dir, store) = temp_store();
        seed(&store, &[("A", 1000, OPEN_END)]);
        let query = IntervalQuery::new(store);

        // `to` is in the future, so it is clamped to `now`
        let usage = query
            .usage_by_origin(Category::Desktop, 0, 99_999, 4000)
            .unwrap();

        assert_eq!(usage.get("A"), Some(&3000));
    }

    #[test]
    fn test_usage_floors_zero_duration_to_one() {
        let (_dir, store) = temp_store();
        seed(&store, &[("A", 1000, 1000)]);
        let query = IntervalQuery::new(store);

        let usage = query
            .usage_by_origin(Category::Desktop, 0, 5000, 5000)
            .unwrap();

        assert_eq!(usage.get("A"), Some(&1));
    }

    #[test]
    fn test_usage_empty_window() {
        let (_dir, store) = temp_store();
        seed(&store, &[("A", 1000, 2000)]);
        let query = IntervalQuery::new(store);

        assert!(query
            .usage_by_origin(Category::Desktop, 5000, 6000, 10_000)
            .unwrap()
            .is_empty());
        assert!(query
            .usage_by_origin(Category::Browser, 0, 10_000, 10_000)
            .unwrap()
            .is_empty());
    }
}
