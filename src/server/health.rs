// Operational endpoints - Health and manual flush

use super::{blocking, ApiError, AppState};
use crate::config::VERSION;
use crate::model::Category;
use crate::tracker::{FlushReport, MetricsSnapshot};
use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

/// Response for the health endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when the store cannot be read
    pub status: &'static str,
    pub version: &'static str,
    pub generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub flush_threshold: usize,
    /// Pings waiting in each category's queue
    pub pending: BTreeMap<&'static str, usize>,
    pub metrics: MetricsSnapshot,
}

/// GET /api/health - Tracker state and counters
pub async fn get_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let tracker = state.tracker.clone();
    let schema = blocking(move || tracker.store().schema_version()).await?;

    let schema_version = match schema {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::warn!("Health check could not read schema version: {}", e);
            None
        }
    };

    let pending = Category::ALL
        .iter()
        .map(|&c| (c.as_str(), state.tracker.pending(c)))
        .collect();

    Ok(Json(HealthResponse {
        status: if schema_version.is_some() {
            "healthy"
        } else {
            "degraded"
        },
        version: VERSION,
        generation: state.tracker.generation(),
        schema_version,
        flush_threshold: state.tracker.flush_threshold(),
        pending,
        metrics: state.tracker.metrics(),
    }))
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub reports: Vec<FlushReport>,
}

/// POST /api/flush - Flush every category's queue now
///
/// Used to retry after a failed flush without waiting for new pings. Newest
/// intervals stay open.
pub async fn post_flush(State(state): State<AppState>) -> Result<Json<FlushResponse>, ApiError> {
    let tracker = state.tracker.clone();
    let reports = blocking(move || tracker.flush_all()).await??;

    tracing::info!(
        pings = reports.iter().map(|r| r.pings).sum::<usize>(),
        "Manual flush completed"
    );
    Ok(Json(FlushResponse { reports }))
}
