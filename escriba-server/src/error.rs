//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code. The wire
//! format is `{"detail": "<message>"}`.
//!
//! Internal errors (storage, decoder internals) are logged with full detail
//! but only a generic message is returned so that file paths and other
//! implementation details never leak to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use escriba_core::{ExtractError, RuntimeError};

/// All errors that can occur in the escriba-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the orchestration runtime.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Propagated from the media extractor.
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The operation is illegal in the task's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An upload exceeded its size cap.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The uploaded file type is not accepted.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Status code plus the client-safe message, shared by the HTTP response
    /// and the per-file entries of batch uploads.
    pub fn client_parts(&self) -> (StatusCode, String) {
        match self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            ServerError::UnsupportedMedia(m) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, m.clone()),

            ServerError::Runtime(e) => match e {
                RuntimeError::QueueFull { .. } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "transcription queue is full, retry later".to_owned(),
                ),
                RuntimeError::TaskNotFound { task_id } => {
                    (StatusCode::NOT_FOUND, format!("task {task_id} not found"))
                }
                RuntimeError::DuplicateTask { task_id } => (
                    StatusCode::CONFLICT,
                    format!("task {task_id} already exists"),
                ),
                RuntimeError::InvalidTransition { task_id, from, .. } => (
                    StatusCode::CONFLICT,
                    format!("task {task_id} is {}", from.as_str()),
                ),
                // Storage and shutdown errors: log the detail, hide it.
                RuntimeError::Persist(_)
                | RuntimeError::Serialize(_)
                | RuntimeError::SchedulerShutdown => {
                    error!(error = %e, "runtime error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },

            ServerError::Extract(e) => match e {
                ExtractError::UnsupportedFormat { extension } => (
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    format!("unsupported video format: .{extension}"),
                ),
                ExtractError::DecoderTimeout { .. } => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "audio extraction timed out".to_owned(),
                ),
                ExtractError::DecoderError { .. } | ExtractError::Io(_) => {
                    error!(error = %e, "audio extraction error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "audio extraction failed".to_owned(),
                    )
                }
            },

            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, detail) = self.client_parts();
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_full_maps_to_503() {
        let err = ServerError::Runtime(RuntimeError::QueueFull { capacity: 48 });
        assert_eq!(err.client_parts().0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unsupported_video_maps_to_415() {
        let err = ServerError::Extract(ExtractError::UnsupportedFormat {
            extension: "txt".to_owned(),
        });
        let (status, detail) = err.client_parts();
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(detail.contains(".txt"));
    }

    #[test]
    fn decoder_timeout_maps_to_504() {
        let err = ServerError::Extract(ExtractError::DecoderTimeout {
            timeout: std::time::Duration::from_secs(600),
        });
        assert_eq!(err.client_parts().0, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn storage_errors_are_redacted() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/secret/tasks.json");
        let err = ServerError::Runtime(RuntimeError::Persist(io));
        let (status, detail) = err.client_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!detail.contains("/secret"));
    }
}
