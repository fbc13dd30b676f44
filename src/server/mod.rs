//! HTTP surface: ping ingestion, interval reporting, health
//!
//! # Routes
//!
//! ```text
//! POST /api/ping/:category   ──→ Tracker::submit        (spawn_blocking)
//! POST /api/flush            ──→ Tracker::flush_all     (spawn_blocking)
//! GET  /api/intervals        ──→ IntervalQuery::intervals
//! GET  /api/stats            ──→ IntervalQuery::usage_by_origin
//! GET  /api/health           ──→ generation, queues, counters
//! ```
//!
//! Tracker and store calls block on SQLite, so handlers move them onto the
//! blocking pool instead of stalling the runtime.

mod error;
mod health;
mod ingest;
mod report;

pub use error::ApiError;
use health::{get_health, post_flush};
use ingest::post_ping;
use report::{get_intervals, get_stats};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::store::IntervalQuery;
use crate::tracker::Tracker;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub query: IntervalQuery,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        let query = IntervalQuery::new(tracker.store().clone());
        Self { tracker, query }
    }
}

/// Run a blocking closure on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Ingestion
        .route("/api/ping/:category", post(post_ping))
        .route("/api/flush", post(post_flush))
        // Reporting
        .route("/api/intervals", get(get_intervals))
        .route("/api/stats", get(get_stats))
        .route("/api/health", get(get_health))
        .with_state(state)
}

/// Start the HTTP server
///
/// Returns once `shutdown_rx` fires (or its sender is dropped) and in-flight
/// requests have completed.
pub async fn start_server(
    bind_addr: SocketAddr,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let app = router(state);

    tracing::info!("Starting server on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_state(flush_threshold: usize) -> (tempfile::TempDir, AppState) {
    use crate::liveness::PriorShutdown;
    use crate::tracker::TrackerConfig;

    let (dir, store) = crate::store::temp_store();
    let tracker = Tracker::new(
        store,
        TrackerConfig {
            flush_threshold,
            ..Default::default()
        },
        PriorShutdown::Clean,
    )
    .unwrap();
    (dir, AppState::new(Arc::new(tracker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    #[tokio::test]
    async fn test_server_stops_on_shutdown_signal() {
        let (_dir, state) = test_state(5);
        let tracker = state.tracker.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let server = tokio::spawn(start_server("127.0.0.1:0".parse().unwrap(), state, rx));
        tx.send(()).unwrap();

        server.await.unwrap().unwrap();
        assert_eq!(tracker.pending(Category::Desktop), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (_dir, state) = test_state(5);
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (_tx, rx) = tokio::sync::oneshot::channel();

        let err = start_server(addr, state, rx).await.unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to bind"));
    }
}
