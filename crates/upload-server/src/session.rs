//! Chunked upload sessions.
//!
//! Each session owns a temp directory holding one file per received chunk
//! (`chunk-000000`, `chunk-000001`, ...). The set of received indices is
//! what counts toward completion, so re-sending a chunk overwrites its file
//! without inflating the count.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracklift_protocol::ChunkProgress;
use tracklift_transfer::{chunk_count, validate_track_name};

use crate::error::UploadError;

/// Shared handle to a session. The mutex serializes chunk writes, counter
/// updates and finalization for that session.
pub type SessionHandle = Arc<Mutex<UploadSession>>;

/// Server-side state of one chunked upload.
#[derive(Debug)]
pub struct UploadSession {
    upload_id: String,
    file_name: String,
    file_size: u64,
    total_chunks: u32,
    temp_dir: PathBuf,
    received: BTreeSet<u32>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_activity: Instant,
    closed: bool,
}

impl UploadSession {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    /// Number of distinct chunk indices stored so far.
    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.received.contains(&index)
    }

    pub fn progress(&self) -> ChunkProgress {
        ChunkProgress {
            received: self.received_count(),
            total: self.total_chunks,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress().is_complete()
    }

    /// Location of the file holding chunk `index`.
    pub fn chunk_path(&self, index: u32) -> PathBuf {
        self.temp_dir.join(format!("chunk-{index:06}"))
    }

    /// A closed session has been finalized or abandoned and must not be
    /// written to, even if a caller still holds its handle.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Result of a [`SessionStore::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions dropped for exceeding the idle TTL.
    pub expired_sessions: usize,
    /// Temp directories removed because no live session owned them.
    pub orphan_dirs: usize,
}

/// In-memory registry of active upload sessions.
pub struct SessionStore {
    temp_root: PathBuf,
    max_chunk_bytes: u64,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    /// Creates a store keeping chunk files under `temp_root`.
    ///
    /// `max_chunk_bytes` is the per-chunk ceiling; larger payloads are
    /// rejected and it bounds how few chunks a file may be declared with.
    pub fn new(temp_root: impl Into<PathBuf>, max_chunk_bytes: u64) -> Self {
        Self {
            temp_root: temp_root.into(),
            max_chunk_bytes,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn max_chunk_bytes(&self) -> u64 {
        self.max_chunk_bytes
    }

    /// Opens a new session and returns its upload id.
    pub async fn init(
        &self,
        file_name: &str,
        file_size: u64,
        total_chunks: u32,
    ) -> Result<String, UploadError> {
        validate_track_name(file_name)?;

        if total_chunks == 0 {
            return Err(UploadError::InvalidRequest(
                "totalChunks must be at least 1".into(),
            ));
        }
        let minimum = chunk_count(file_size, self.max_chunk_bytes);
        if total_chunks < minimum {
            return Err(UploadError::InvalidRequest(format!(
                "{file_size} bytes need at least {minimum} chunks, got {total_chunks}"
            )));
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let temp_dir = self.temp_root.join(&upload_id);

        // The directory is created under the write lock so a concurrent
        // sweep never sees it without its session.
        let mut sessions = self.sessions.write().await;
        tokio::fs::create_dir_all(&temp_dir).await?;

        let session = UploadSession {
            upload_id: upload_id.clone(),
            file_name: file_name.to_string(),
            file_size,
            total_chunks,
            temp_dir,
            received: BTreeSet::new(),
            created_at: chrono::Utc::now(),
            last_activity: Instant::now(),
            closed: false,
        };
        sessions.insert(upload_id.clone(), Arc::new(Mutex::new(session)));
        drop(sessions);

        info!(
            upload_id = %upload_id,
            file_name,
            file_size,
            total_chunks,
            "upload session opened"
        );
        Ok(upload_id)
    }

    /// Looks up a session handle.
    pub async fn get(&self, upload_id: &str) -> Result<SessionHandle, UploadError> {
        self.sessions
            .read()
            .await
            .get(upload_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))
    }

    /// Current `{received, total}` for a session.
    pub async fn progress(&self, upload_id: &str) -> Result<ChunkProgress, UploadError> {
        let handle = self.get(upload_id).await?;
        let session = handle.lock().await;
        if session.is_closed() {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        Ok(session.progress())
    }

    /// Persists one chunk and returns the updated progress.
    ///
    /// `data` is `None` when the request carried no chunk part. A declared
    /// `total_chunks` must match the count recorded at init.
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: Option<u32>,
        data: Option<&[u8]>,
    ) -> Result<ChunkProgress, UploadError> {
        let handle = self.get(upload_id).await?;
        let data = data.ok_or(UploadError::MissingPayload)?;

        if data.len() as u64 > self.max_chunk_bytes {
            return Err(UploadError::InvalidRequest(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                data.len(),
                self.max_chunk_bytes
            )));
        }

        let mut session = handle.lock().await;
        if session.is_closed() {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        if let Some(declared) = total_chunks
            && declared != session.total_chunks
        {
            return Err(UploadError::InvalidRequest(format!(
                "totalChunks {declared} does not match session ({})",
                session.total_chunks
            )));
        }
        if chunk_index >= session.total_chunks {
            return Err(UploadError::InvalidRequest(format!(
                "chunkIndex {chunk_index} out of range (total {})",
                session.total_chunks
            )));
        }

        let target = session.chunk_path(chunk_index);
        let staging = target.with_extension("part");
        tokio::fs::write(&staging, data).await?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        let first_time = session.received.insert(chunk_index);
        session.touch();
        let progress = session.progress();

        debug!(
            upload_id,
            chunk_index,
            bytes = data.len(),
            received = progress.received,
            total = progress.total,
            duplicate = !first_time,
            "chunk stored"
        );
        Ok(progress)
    }

    /// Destroys a session and its temp directory.
    pub async fn abandon(&self, upload_id: &str) -> Result<(), UploadError> {
        let handle = self.get(upload_id).await?;
        let mut session = handle.lock().await;
        if session.is_closed() {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        session.close();
        let temp_dir = session.temp_dir.clone();
        drop(session);

        self.discard(upload_id, &temp_dir).await;
        info!(upload_id, "upload session abandoned");
        Ok(())
    }

    /// Removes the map entry and the temp directory of a closed session.
    pub(crate) async fn discard(&self, upload_id: &str, temp_dir: &Path) {
        self.sessions.write().await.remove(upload_id);
        remove_dir_logged(temp_dir).await;
    }

    /// Drops sessions idle longer than `ttl` and temp directories that no
    /// live session owns.
    ///
    /// Sessions currently locked (a chunk write or finalize in progress)
    /// are skipped. The session map is only locked while ids are collected
    /// and matched; directories are removed after it is released.
    pub async fn sweep(&self, ttl: Duration) -> Result<SweepReport, UploadError> {
        let mut report = SweepReport::default();

        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|id, handle| {
                let Ok(mut session) = handle.try_lock() else {
                    return true;
                };
                if session.last_activity.elapsed() < ttl {
                    return true;
                }
                session.close();
                expired.push((id.clone(), session.temp_dir.clone()));
                false
            });
        }

        for (id, temp_dir) in &expired {
            remove_dir_logged(temp_dir).await;
            info!(upload_id = %id, "expired upload session removed");
        }
        report.expired_sessions = expired.len();

        let mut entries = match tokio::fs::read_dir(&self.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                candidates.push(entry);
            }
        }

        // `init` creates a directory and inserts its session under one write
        // lock, so every directory listed above is either in the map by now
        // or orphaned for good.
        let orphans: Vec<PathBuf> = {
            let sessions = self.sessions.read().await;
            candidates
                .into_iter()
                .filter(|entry| {
                    !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|n| sessions.contains_key(n))
                })
                .map(|entry| entry.path())
                .collect()
        };

        for path in orphans {
            remove_dir_logged(&path).await;
            info!(path = %path.display(), "orphaned upload directory removed");
            report.orphan_dirs += 1;
        }

        Ok(report)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

async fn remove_dir_logged(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove upload directory"),
    }
}
