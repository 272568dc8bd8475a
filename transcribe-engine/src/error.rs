//! Error types for transcribe-engine.
//!
//! Two tiers, deliberately kept apart:
//! - [`StageError`] is what a pipeline stage (C2-C6) returns internally.
//!   The orchestrator folds a terminal `StageError` into the job
//!   record's `error: {kind, stage, message}` rather than unwinding the
//!   worker task.
//! - [`ApiError`] is what the HTTP/WS surface returns, mapped to the
//!   status codes in the external interface contract.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use transcribe_common::model::ErrorKind;

/// Internal error raised by a pipeline stage. One variant per
/// `error.kind` value the job record can carry.
#[derive(Debug, Error, Clone)]
pub enum StageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("source too long: {0}")]
    SourceTooLong(String),

    #[error("model error: {0}")]
    ModelError(String),

    #[error("no audio content: {0}")]
    NoAudioContent(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::SourceTooLong(_) => ErrorKind::SourceTooLong,
            Self::ModelError(_) => ErrorKind::ModelError,
            Self::NoAudioContent(_) => ErrorKind::NoAudioContent,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<transcribe_common::Error> for StageError {
    fn from(err: transcribe_common::Error) -> Self {
        StageError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Internal(err.to_string())
    }
}

/// API-facing error type, mapped to HTTP status per the external
/// interface contract: 400 malformed, 422 unprocessable source, 429
/// rate-limited, 404 unknown job/artifact, 500 everything else.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    SourceUnavailable(String),

    #[error("source too long: {0}")]
    SourceTooLong(String),

    #[error("rate limited")]
    RateLimited,

    #[error("model error: {0}")]
    ModelError(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("common error: {0}")]
    Common(#[from] transcribe_common::Error),
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::InvalidInput(m) => ApiError::BadRequest(m),
            StageError::SourceUnavailable(m) => ApiError::SourceUnavailable(m),
            StageError::SourceTooLong(m) => ApiError::SourceTooLong(m),
            StageError::ModelError(m) => ApiError::ModelError(m),
            StageError::NoAudioContent(m) => ApiError::Internal(m),
            StageError::Internal(m) => ApiError::Internal(m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::SourceUnavailable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "SOURCE_UNAVAILABLE", msg)
            }
            ApiError::SourceTooLong(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "SOURCE_TOO_LONG", msg)
            }
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "too many requests".to_string(),
            ),
            ApiError::ModelError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "MODEL_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
