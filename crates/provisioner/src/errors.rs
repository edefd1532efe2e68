use crate::credentials::AuthFailure;
use crate::log::LogError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Pipeline error taxonomy.
///
/// - `TransientIo`: retried by looping or redelivery, never terminal
/// - `NotFound`: logged, the triggering message is discarded
/// - `Invalid`: uniform "unauthorized" outward, reason kept for diagnostics
/// - `Fatal`: configuration or key problems, aborts the calling context
/// - `BadRequest`: a caller-supplied value the log will never accept
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid credential: {0}")]
    Invalid(AuthFailure),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(
        "Retention trim to offset {requested} on partition {partition} rejected: \
         group {group} has only committed up to {committed}"
    )]
    TrimAheadOfCommit {
        partition: i32,
        requested: i64,
        group: String,
        committed: i64,
    },
}

impl PipelineError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientIo(_))
    }
}

impl From<LogError> for PipelineError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::UnknownTopic(_) | LogError::UnknownPartition { .. } => {
                PipelineError::NotFound(err.to_string())
            }
            LogError::Closed => PipelineError::Fatal(err.to_string()),
            LogError::MessageTooLarge { .. } => PipelineError::BadRequest(err.to_string()),
            _ => PipelineError::TransientIo(err.to_string()),
        }
    }
}

impl From<AuthFailure> for PipelineError {
    fn from(reason: AuthFailure) -> Self {
        PipelineError::Invalid(reason)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            PipelineError::TransientIo(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "A dependency is temporarily unavailable".to_string(),
            ),
            PipelineError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "The requested resource was not found".to_string(),
            ),
            // Every reason collapses to the same body
            PipelineError::Invalid(_) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            PipelineError::Fatal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
            PipelineError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                reason.clone(),
            ),
            PipelineError::TrimAheadOfCommit { .. } => (
                StatusCode::CONFLICT,
                "TRIM_AHEAD_OF_COMMIT",
                self.to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
