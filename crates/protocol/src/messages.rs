use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a chunked upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    #[serde(default)]
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

/// Reassembles a session's chunks into the destination object.
///
/// `total_chunks` is optional on the wire; when absent the server uses the
/// count recorded at session init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

/// Requests a signed URL for a one-shot direct upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    #[serde(default)]
    pub file_name: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
}

/// Distinct chunks persisted so far for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub received: u32,
    pub total: u32,
}

impl ChunkProgress {
    /// Returns `true` once every chunk position has been stored.
    pub fn is_complete(&self) -> bool {
        self.received == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    pub progress: ChunkProgress,
}

/// A stored track object.
///
/// `name` is relative to the tracks prefix (`take1.wav` for the object
/// `tracks/take1.wav`) and is what `DELETE /api/tracks/{name}` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTrack {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    pub message: String,
    pub file: StoredTrack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTracksResponse {
    pub items: Vec<StoredTrack>,
}

/// Generic acknowledgement (used by delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub signed_url: String,
}

/// Body of every non-2xx response.
///
/// `code` is a stable machine-readable tag (`session_not_found`,
/// `incomplete_upload`, ...); `error` is human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
