use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracklift_protocol::AUDIO_CONTENT_TYPE;
use tracklift_transfer::has_audio_extension;

use crate::QueueError;

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl UploadStatus {
    /// Pending or uploading.
    pub fn is_active(self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }

    /// Completed, failed or cancelled. Only `Error` can leave this set (via retry).
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub path: PathBuf,
    /// File name sent to the server (last path component).
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileRef {
    /// Reads size and modification time from the filesystem.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(QueueError::Validation(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| QueueError::Validation(format!("no file name: {}", path.display())))?;

        Ok(Self {
            content_type: content_type_for(&name).to_string(),
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

fn content_type_for(name: &str) -> &'static str {
    if has_audio_extension(name) {
        AUDIO_CONTENT_TYPE
    } else {
        "application/octet-stream"
    }
}

/// One file's transfer lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub id: String,
    pub file: FileRef,
    pub status: UploadStatus,
    /// 0..=100.
    pub progress: f64,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new(file: FileRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file,
            status: UploadStatus::Pending,
            progress: 0.0,
            status_text: "Waiting".into(),
            error: None,
            added_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Events sent by a transfer worker to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started,
    Progress { percent: f64, text: String },
    /// `path` is the stored track name reported by the server.
    Completed { path: String, size: u64 },
    Failed { reason: String },
    Cancelled,
}

impl TransferEvent {
    /// `true` for the last event a worker sends.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. } | TransferEvent::Failed { .. } | TransferEvent::Cancelled
        )
    }
}

/// Notifications delivered to queue listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Full queue snapshot after a status change.
    QueueUpdated(Vec<UploadItem>),
    UploadProgress {
        id: String,
        progress: f64,
        status_text: String,
    },
}

/// Number of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn active(&self) -> usize {
        self.pending + self.uploading
    }
}

/// A file refused by [`UploadQueue::add_files`](crate::UploadQueue::add_files).
#[derive(Debug)]
pub struct RejectedFile {
    pub file: FileRef,
    pub error: QueueError,
}

/// Result of adding a batch of files.
#[derive(Debug, Default)]
pub struct AddFilesOutcome {
    /// Ids of the newly queued items, in input order.
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedFile>,
}
