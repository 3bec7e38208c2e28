use std::time::Duration;

/// Maximum size of a single chunk (25 MiB).
///
/// Stays under the per-request body ceiling of the hosting transport.
/// The server rejects chunk payloads larger than this.
pub const CHUNK_SIZE: u64 = 25 * 1024 * 1024;

/// Number of transfers the client runs at once.
pub const MAX_CONCURRENT_UPLOADS: usize = 3;

/// Progress reported once every chunk is acknowledged.
///
/// The last 10% is reserved for finalization so an item never shows
/// 100% before the object is stored.
pub const CHUNK_PROGRESS_CEILING: f64 = 90.0;

/// The only accepted track extension (lowercase, without the dot).
pub const AUDIO_EXTENSION: &str = "wav";

/// MIME type stored with every track object.
pub const AUDIO_CONTENT_TYPE: &str = "audio/wav";

/// Object key prefix under which finished tracks are stored.
pub const TRACKS_PREFIX: &str = "tracks/";

/// Default lifetime of a signed direct-upload URL.
pub const DIRECT_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Timeout for JSON requests (init, finalize, listing).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single chunk request.
///
/// A 25 MiB body on a slow uplink can take minutes.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Endpoint paths
// ---------------------------------------------------------------------------

pub const PATH_INIT_UPLOAD: &str = "/api/init-upload";
pub const PATH_UPLOAD_CHUNK: &str = "/api/upload-chunk";
pub const PATH_FINALIZE_UPLOAD: &str = "/api/finalize-upload";
pub const PATH_LIST_TRACKS: &str = "/api/list-tracks";
/// Prefix for `DELETE /api/tracks/{object path}`.
pub const PATH_TRACKS: &str = "/api/tracks";
pub const PATH_GET_UPLOAD_URL: &str = "/api/get-upload-url";
/// Prefix for the local direct-upload target (`PUT /api/direct-upload/{object path}`).
pub const PATH_DIRECT_UPLOAD: &str = "/api/direct-upload";

// ---------------------------------------------------------------------------
// Multipart field names for `upload-chunk`
// ---------------------------------------------------------------------------

pub const FIELD_UPLOAD_ID: &str = "uploadId";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";
pub const FIELD_CHUNK: &str = "chunk";

// ---------------------------------------------------------------------------
// Signed URL query parameters
// ---------------------------------------------------------------------------

pub const QUERY_EXPIRES: &str = "expires";
pub const QUERY_SIGNATURE: &str = "signature";
