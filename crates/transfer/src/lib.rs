//! Chunk planning and source-file access for chunked uploads.
//!
//! The [`plan`] function is the single source of truth for how a file is
//! cut into chunks; both the client (to send) and the server (to validate
//! session parameters) rely on it.

mod chunked;
mod validation;

pub use chunked::{ChunkRange, ChunkReader, chunk_count, plan};
pub use validation::{has_audio_extension, validate_object_path, validate_track_name};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid file type: {0}")]
    InvalidFileType(String),
}
