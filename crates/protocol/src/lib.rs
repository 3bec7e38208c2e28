//! Wire protocol for the Tracklift upload service.
//!
//! Shared between the upload server and the client-side queue so both
//! sides agree on endpoint paths, multipart field names, JSON payload
//! shapes, and the chunking constants.

pub mod constants;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::{
    AUDIO_CONTENT_TYPE, AUDIO_EXTENSION, CHUNK_PROGRESS_CEILING, CHUNK_SIZE,
    MAX_CONCURRENT_UPLOADS, TRACKS_PREFIX,
};
pub use messages::{
    ChunkProgress, ErrorResponse, FinalizeUploadRequest, FinalizeUploadResponse,
    InitUploadRequest, InitUploadResponse, ListTracksResponse, MessageResponse, StoredTrack,
    UploadChunkResponse, UploadUrlRequest, UploadUrlResponse,
};
