/// Errors produced by the upload queue, its workers and the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("already queued: {0}")]
    Duplicate(String),

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    // The next three carry the server's message, which already names the
    // failure.
    #[error("{0}")]
    SessionNotFound(String),

    #[error("{0}")]
    IncompleteUpload(String),

    #[error("{0}")]
    StorageWrite(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        QueueError::Transport(e.to_string())
    }
}

impl From<tracklift_transfer::TransferError> for QueueError {
    fn from(e: tracklift_transfer::TransferError) -> Self {
        match e {
            tracklift_transfer::TransferError::Io(io) => QueueError::Io(io),
            other => QueueError::Validation(other.to_string()),
        }
    }
}

impl QueueError {
    /// Maps a non-2xx response back to a variant.
    ///
    /// `code` is the server's machine-readable tag when the body parsed as
    /// an error response.
    pub fn from_response(status: u16, code: Option<&str>, message: String) -> Self {
        match (status, code) {
            (_, Some("session_not_found")) => QueueError::SessionNotFound(message),
            (_, Some("incomplete_upload")) | (409, _) => QueueError::IncompleteUpload(message),
            (_, Some("storage_write_failed")) | (502, _) => QueueError::StorageWrite(message),
            (400, _) => QueueError::Validation(message),
            (404, _) => QueueError::NotFound(message),
            _ => QueueError::Server { status, message },
        }
    }
}
