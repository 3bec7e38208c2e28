//! Upload server error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use tracklift_protocol::ErrorResponse;
use tracklift_storage::{SignatureError, StorageError};
use tracklift_transfer::TransferError;

/// Errors produced by the session store, finalizer and HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("no chunk payload attached")]
    MissingPayload,

    #[error("upload incomplete: received {received} of {total} chunks")]
    IncompleteUpload { received: u32, total: u32 },

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::InvalidRequest(_) | UploadError::MissingPayload => StatusCode::BAD_REQUEST,
            UploadError::SessionNotFound(_) | UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::IncompleteUpload { .. } => StatusCode::CONFLICT,
            UploadError::Forbidden(_) => StatusCode::FORBIDDEN,
            UploadError::StorageWrite(_) => StatusCode::BAD_GATEWAY,
            UploadError::Storage(StorageError::Unsupported(_)) => StatusCode::NOT_IMPLEMENTED,
            UploadError::Storage(_) => StatusCode::BAD_GATEWAY,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag carried in [`ErrorResponse::code`].
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::InvalidRequest(_) => "invalid_request",
            UploadError::SessionNotFound(_) => "session_not_found",
            UploadError::MissingPayload => "missing_payload",
            UploadError::IncompleteUpload { .. } => "incomplete_upload",
            UploadError::StorageWrite(_) => "storage_write_failed",
            UploadError::NotFound(_) => "not_found",
            UploadError::Forbidden(_) => "forbidden",
            UploadError::Storage(_) => "storage_error",
            UploadError::Io(_) => "internal",
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(path) => UploadError::NotFound(path),
            StorageError::InvalidPath(msg) => UploadError::InvalidRequest(msg),
            other => UploadError::Storage(other),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(io) => UploadError::Io(io),
            other => UploadError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<SignatureError> for UploadError {
    fn from(e: SignatureError) -> Self {
        UploadError::Forbidden(e.to_string())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            debug!(code = self.code(), error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            UploadError::SessionNotFound("u".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(UploadError::MissingPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            UploadError::IncompleteUpload {
                received: 1,
                total: 2
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            UploadError::StorageWrite("disk full".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let err: UploadError = StorageError::NotFound("tracks/a.wav".into()).into();
        assert!(matches!(err, UploadError::NotFound(_)));
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn transfer_validation_maps_to_invalid_request() {
        let err: UploadError = TransferError::InvalidFileType("a.mp3".into()).into();
        assert!(matches!(err, UploadError::InvalidRequest(_)));
    }

    #[test]
    fn signature_errors_are_forbidden() {
        let err: UploadError = SignatureError::Expired.into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
