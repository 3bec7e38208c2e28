//! Durable JSON snapshot of the upload queue.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::QueueError;
use crate::types::{UploadItem, UploadStatus};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    items: Vec<UploadItem>,
}

/// Reads and atomically rewrites the queue snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved items. A missing file yields an empty list.
    pub fn load(&self) -> Result<Vec<UploadItem>, QueueError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let file: SnapshotFile = serde_json::from_str(&data)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(QueueError::Validation(format!(
                "unsupported snapshot version {}",
                file.version
            )));
        }
        debug!("loaded {} queue item(s) from {:?}", file.items.len(), self.path);
        Ok(file.items)
    }

    /// Replaces the snapshot with `items`.
    ///
    /// Writes a sibling temp file and renames it over the target, so a
    /// crash leaves either the old or the new snapshot.
    pub fn save(&self, items: &[UploadItem]) -> Result<(), QueueError> {
        let json = serde_json::to_string_pretty(&SnapshotFile {
            version: SNAPSHOT_VERSION,
            items: items.to_vec(),
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} queue item(s) to {:?}", items.len(), self.path);
        Ok(())
    }
}

/// Applies the restart rules to items loaded from a snapshot.
///
/// Pending items stay pending. Interrupted uploads go back to pending and
/// start over from the first chunk on a fresh session. Failed items stay
/// failed so they can be retried. Completed and cancelled items are dropped.
pub fn restore_items(items: Vec<UploadItem>) -> Vec<UploadItem> {
    items
        .into_iter()
        .filter_map(|mut item| match item.status {
            UploadStatus::Pending => Some(item),
            UploadStatus::Uploading => {
                item.status = UploadStatus::Pending;
                item.progress = 0.0;
                item.status_text = "Interrupted, restarting from the first chunk".into();
                Some(item)
            }
            UploadStatus::Error => Some(item),
            UploadStatus::Completed | UploadStatus::Cancelled => None,
        })
        .collect()
}

/// Returns the default snapshot path.
pub fn default_snapshot_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("tracklift").join("upload-queue.json"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileRef;

    fn item(name: &str, status: UploadStatus, progress: f64) -> UploadItem {
        let mut item = UploadItem::new(FileRef {
            path: PathBuf::from("/music").join(name),
            name: name.into(),
            size: 10,
            content_type: "audio/wav".into(),
            last_modified: None,
        });
        item.status = status;
        item.progress = progress;
        if status == UploadStatus::Error {
            item.error = Some("connection reset".into());
        }
        item
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("queue.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("nested").join("queue.json"));
        let items = vec![
            item("a.wav", UploadStatus::Pending, 0.0),
            item("b.wav", UploadStatus::Uploading, 45.0),
        ];

        store.save(&items).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, items);
        assert!(!tmp.path().join("nested").join("queue.json.tmp").exists());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SnapshotStore::new(path).load(),
            Err(QueueError::Json(_))
        ));
    }

    #[test]
    fn restore_rules() {
        let restored = restore_items(vec![
            item("pending.wav", UploadStatus::Pending, 0.0),
            item("uploading.wav", UploadStatus::Uploading, 63.0),
            item("error.wav", UploadStatus::Error, 20.0),
            item("done.wav", UploadStatus::Completed, 100.0),
            item("cancelled.wav", UploadStatus::Cancelled, 10.0),
        ]);

        let summary: Vec<(&str, UploadStatus, f64)> = restored
            .iter()
            .map(|i| (i.file.name.as_str(), i.status, i.progress))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("pending.wav", UploadStatus::Pending, 0.0),
                ("uploading.wav", UploadStatus::Pending, 0.0),
                ("error.wav", UploadStatus::Error, 20.0),
            ]
        );
        assert!(restored[1].status_text.contains("first chunk"));
        assert_eq!(restored[2].error.as_deref(), Some("connection reset"));
    }
}
