use crate::services::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Unprocessable Entity: {0}")]
    Unprocessable(String),

    #[error("Gateway Timeout: {0}")]
    Timeout(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let message = err.to_string();
        match err {
            UploadError::InvalidFingerprint(_)
            | UploadError::InvalidTargetName(_)
            | UploadError::InvalidChunkIndex(_) => AppError::BadRequest(message),
            UploadError::NotFound(_) => AppError::NotFound(message),
            UploadError::IncompleteUpload { .. } => AppError::Conflict(message),
            UploadError::ChunkTooLarge { .. } => AppError::PayloadTooLarge(message),
            UploadError::FingerprintMismatch { .. } => AppError::Unprocessable(message),
            UploadError::TimedOut(_) => AppError::Timeout(message),
            UploadError::Io(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Timeout(msg) => {
                tracing::warn!("Upload operation timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
