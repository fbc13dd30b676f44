// Reporting endpoints - Raw intervals and per-origin usage totals

use super::{blocking, ApiError, AppState};
use crate::model::{now_millis, Category};
use crate::store::Interval;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query parameters shared by /api/intervals and /api/stats
///
/// Every field is optional at the extractor level so a missing one becomes a
/// 400 with a readable message instead of a generic rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(rename = "type")]
    pub category: Option<String>,
    /// Start of the range (epoch ms, inclusive)
    pub from: Option<i64>,
    /// End of the range (epoch ms, exclusive)
    pub to: Option<i64>,
}

impl RangeQuery {
    fn validate(self) -> Result<(Category, i64, i64), ApiError> {
        let (Some(category), Some(from), Some(to)) = (self.category, self.from, self.to) else {
            return Err(ApiError::BadRequest(
                "from, to and type are required".to_string(),
            ));
        };
        if from > to {
            return Err(ApiError::BadRequest("from is bigger than to".to_string()));
        }
        let category = category
            .parse::<Category>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok((category, from, to))
    }
}

#[derive(Debug, Serialize)]
pub struct IntervalsResponse {
    #[serde(rename = "type")]
    pub category: Category,
    pub from: i64,
    pub to: i64,
    pub intervals: Vec<Interval>,
}

/// GET /api/intervals - Intervals starting inside `[from, to)`
///
/// Ongoing intervals are reported with `to == 0`.
pub async fn get_intervals(
    State(state): State<AppState>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<IntervalsResponse>, ApiError> {
    let (category, from, to) = params.validate()?;

    let query = state.query.clone();
    let intervals = blocking(move || query.intervals(category, from, to)).await??;

    Ok(Json(IntervalsResponse {
        category,
        from,
        to,
        intervals,
    }))
}

/// GET /api/stats - Total attention time (ms) per origin
///
/// `to` is clamped to the current time; ongoing intervals count up to it.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<BTreeMap<String, i64>>, ApiError> {
    let (category, from, to) = params.validate()?;
    let now = now_millis();

    let query = state.query.clone();
    let usage = blocking(move || query.usage_by_origin(category, from, to, now)).await??;

    tracing::debug!(%category, from, to, origins = usage.len(), "Served usage stats");
    Ok(Json(usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimeEntry, OPEN_END};
    use crate::server::test_state;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn range(category: &str, from: i64, to: i64) -> Query<RangeQuery> {
        Query(RangeQuery {
            category: Some(category.to_string()),
            from: Some(from),
            to: Some(to),
        })
    }

    fn seed(state: &AppState, category: Category, rows: &[(&str, i64, i64)]) {
        for (origin, from, to) in rows {
            state
                .tracker
                .store()
                .append(&TimeEntry {
                    category,
                    origin: origin.to_string(),
                    from_timestamp: *from,
                    to_timestamp: *to,
                    generation: 0,
                })
                .unwrap();
        }
    }

    async fn status_of(params: RangeQuery) -> StatusCode {
        let (_dir, state) = test_state(5);
        get_stats(State(state), Query(params))
            .await
            .unwrap_err()
            .into_response()
            .status()
    }

    #[tokio::test]
    async fn test_stats_sums_per_origin() {
        let (_dir, state) = test_state(5);
        seed(
            &state,
            Category::Desktop,
            &[("A", 1000, 2000), ("B", 2000, 2500), ("A", 2500, 2500), ("A", 3000, 4000)],
        );

        let Json(usage) = get_stats(State(state), range("desktop", 0, 10_000))
            .await
            .unwrap();

        assert_eq!(usage.get("A"), Some(&2001));
        assert_eq!(usage.get("B"), Some(&500));
    }

    #[tokio::test]
    async fn test_stats_ongoing_interval_counts_to_range_end() {
        let (_dir, state) = test_state(5);
        seed(&state, Category::Browser, &[("docs.rs", 1000, OPEN_END)]);

        let Json(usage) = get_stats(State(state), range("browser", 0, 5000))
            .await
            .unwrap();

        assert_eq!(usage.get("docs.rs"), Some(&4000));
    }

    #[tokio::test]
    async fn test_stats_validation() {
        assert_eq!(
            status_of(RangeQuery::default()).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RangeQuery {
                category: Some("desktop".into()),
                from: Some(10),
                to: None,
            })
            .await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RangeQuery {
                category: Some("desktop".into()),
                from: Some(10),
                to: Some(5),
            })
            .await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RangeQuery {
                category: Some("tablet".into()),
                from: Some(0),
                to: Some(5),
            })
            .await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_intervals_returns_rows_in_range() {
        let (_dir, state) = test_state(5);
        seed(
            &state,
            Category::Desktop,
            &[("A", 1000, 2000), ("B", 2000, 3000), ("C", 3000, OPEN_END)],
        );

        let Json(response) = get_intervals(State(state), range("desktop", 2000, 3500))
            .await
            .unwrap();

        assert_eq!(response.category, Category::Desktop);
        let origins: Vec<_> = response.intervals.iter().map(|i| i.origin.as_str()).collect();
        assert_eq!(origins, ["B", "C"]);
        assert!(response.intervals[1].is_ongoing());
    }

    #[tokio::test]
    async fn test_intervals_empty_range() {
        let (_dir, state) = test_state(5);

        let Json(response) = get_intervals(State(state), range("browser", 0, 0))
            .await
            .unwrap();

        assert!(response.intervals.is_empty());
    }
}
