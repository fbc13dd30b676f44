//! API error responses

use axum::{http::StatusCode, response::IntoResponse};

use crate::store::StoreError;
use crate::tracker::TrackError;

/// API error responses
/// Converted to HTTP status codes via IntoResponse
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The store could not be written or read; the request may be retried
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!("API error: {} - {}", status, message);
        } else {
            tracing::debug!("API rejection: {} - {}", status, message);
        }

        (status, message).into_response()
    }
}

impl From<TrackError> for ApiError {
    fn from(e: TrackError) -> Self {
        match e {
            TrackError::UnknownCategory(_) | TrackError::EmptyOrigin(_) => {
                ApiError::BadRequest(e.to_string())
            }
            TrackError::Store(store) => store.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Sqlite(_) | StoreError::Pool(_) => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Blocking task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, UnknownCategory};

    #[test]
    fn test_status_mapping() {
        let unknown: ApiError = TrackError::UnknownCategory(UnknownCategory("x".into())).into();
        assert_eq!(unknown.into_response().status(), StatusCode::BAD_REQUEST);

        let empty: ApiError = TrackError::EmptyOrigin(Category::Browser).into();
        assert_eq!(empty.into_response().status(), StatusCode::BAD_REQUEST);

        let busy: ApiError = TrackError::Store(StoreError::Sqlite(rusqlite::Error::InvalidQuery)).into();
        assert_eq!(busy.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let missing: ApiError = StoreError::NoEntry(Category::Desktop).into();
        assert_eq!(
            missing.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
