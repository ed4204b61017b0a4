//! Error types for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cadence_scheduler::SchedulerError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors that can occur while serving requests.
#[derive(Debug, Error)]
pub enum WebError {
    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl WebError {
    fn status(&self) -> StatusCode {
        match self {
            WebError::Scheduler(
                SchedulerError::UnknownPhase(_)
                | SchedulerError::InvalidTime(_)
                | SchedulerError::InvalidUserId(_),
            )
            | WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Scheduler(SchedulerError::UnknownUser(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
