use serde::{Deserialize, Serialize};
use tracklift_protocol::CHUNK_SIZE;

/// How a single file is sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Session init, one request per chunk, then finalize.
    Chunked,
    /// One `PUT` of the whole file to a signed URL.
    Direct,
}

/// Chooses between chunked and direct uploads by file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPolicy {
    pub direct_enabled: bool,
    /// Largest file sent directly (inclusive).
    pub direct_max_size: u64,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            direct_enabled: false,
            direct_max_size: CHUNK_SIZE,
        }
    }
}

impl StrategyPolicy {
    pub fn choose(&self, file_size: u64) -> UploadStrategy {
        if self.direct_enabled && file_size <= self.direct_max_size {
            UploadStrategy::Direct
        } else {
            UploadStrategy::Chunked
        }
    }
}
