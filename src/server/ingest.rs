// Ingestion endpoint - Sensors report what currently holds attention

use super::{blocking, ApiError, AppState};
use crate::model::now_millis;
use crate::tracker::{FlushReport, SubmitOutcome};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

/// Body of a ping
///
/// Older sensors send `program` (desktop) or `hostname` (browser) instead of
/// `origin`; both are accepted.
#[derive(Debug, Deserialize)]
pub struct PingRequest {
    #[serde(alias = "program", alias = "hostname")]
    pub origin: String,
    /// Observation time in epoch ms; defaults to the server clock
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PingResponse {
    Buffered { pending: usize },
    Flushed { report: FlushReport },
}

impl From<SubmitOutcome> for PingResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Buffered { pending } => PingResponse::Buffered { pending },
            SubmitOutcome::Flushed(report) => PingResponse::Flushed { report },
        }
    }
}

/// POST /api/ping/:category - Queue a ping
///
/// Returns 400 for an unknown category or an empty origin. If the ping
/// completed a batch whose flush failed, the ping stays queued and 503 is
/// returned.
pub async fn post_ping(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Json(request): Json<PingRequest>,
) -> Result<Json<PingResponse>, ApiError> {
    let timestamp = request.timestamp.unwrap_or_else(now_millis);

    let tracker = state.tracker.clone();
    let outcome =
        blocking(move || tracker.submit_raw(&category, &request.origin, timestamp)).await??;

    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::server::test_state;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn ping(origin: &str, timestamp: i64) -> Json<PingRequest> {
        Json(PingRequest {
            origin: origin.to_string(),
            timestamp: Some(timestamp),
        })
    }

    #[test]
    fn test_request_accepts_legacy_field_names() {
        let desktop: PingRequest = serde_json::from_str(r#"{"program": "code"}"#).unwrap();
        assert_eq!(desktop.origin, "code");
        assert_eq!(desktop.timestamp, None);

        let browser: PingRequest =
            serde_json::from_str(r#"{"hostname": "docs.rs", "timestamp": 42}"#).unwrap();
        assert_eq!(browser.origin, "docs.rs");
        assert_eq!(browser.timestamp, Some(42));
    }

    #[tokio::test]
    async fn test_ping_buffers_then_flushes() {
        let (_dir, state) = test_state(2);

        let Json(first) = post_ping(
            State(state.clone()),
            Path("desktop".to_string()),
            ping("A", 1000),
        )
        .await
        .unwrap();
        assert!(matches!(first, PingResponse::Buffered { pending: 1 }));

        let Json(second) = post_ping(
            State(state.clone()),
            Path("desktop".to_string()),
            ping("B", 2000),
        )
        .await
        .unwrap();
        match second {
            PingResponse::Flushed { report } => {
                assert_eq!(report.pings, 2);
                assert_eq!(report.inserted, 2);
            }
            other => panic!("expected a flush, got {:?}", other),
        }

        let rows = state.query.intervals(Category::Desktop, 0, i64::MAX).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].to, 2000);
        assert!(rows[1].is_ongoing());
    }

    #[tokio::test]
    async fn test_unknown_category_is_bad_request() {
        let (_dir, state) = test_state(5);

        let err = post_ping(State(state), Path("mobile".to_string()), ping("A", 1))
            .await
            .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_origin_is_bad_request() {
        let (_dir, state) = test_state(5);

        let err = post_ping(State(state.clone()), Path("browser".to_string()), ping("  ", 1))
            .await
            .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.tracker.pending(Category::Browser), 0);
    }

    #[tokio::test]
    async fn test_missing_timestamp_uses_server_clock() {
        let (_dir, state) = test_state(1);
        let before = now_millis();

        post_ping(
            State(state.clone()),
            Path("browser".to_string()),
            Json(PingRequest {
                origin: "example.com".to_string(),
                timestamp: None,
            }),
        )
        .await
        .unwrap();

        let rows = state.query.intervals(Category::Browser, 0, i64::MAX).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].from >= before);
    }
}
