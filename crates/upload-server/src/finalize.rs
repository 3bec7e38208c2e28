//! Reassembly of a completed session into its destination object.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracklift_protocol::AUDIO_CONTENT_TYPE;
use tracklift_storage::{ObjectInfo, ObjectStore, ObjectWriter, StorageError};
use tracklift_transfer::validate_track_name;

use crate::error::UploadError;
use crate::session::{SessionStore, UploadSession};

/// Read buffer used when streaming chunk files into the object writer.
const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Streams a session's chunk files, in index order, into object storage.
pub struct Finalizer {
    sessions: Arc<SessionStore>,
    store: Arc<dyn ObjectStore>,
    tracks_prefix: String,
}

impl Finalizer {
    pub fn new(
        sessions: Arc<SessionStore>,
        store: Arc<dyn ObjectStore>,
        tracks_prefix: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            store,
            tracks_prefix: tracks_prefix.into(),
        }
    }

    pub fn tracks_prefix(&self) -> &str {
        &self.tracks_prefix
    }

    /// Object path a track name is stored under.
    pub fn object_path(&self, file_name: &str) -> String {
        format!("{}{}", self.tracks_prefix, file_name)
    }

    /// Reassembles `upload_id` into `<prefix><file_name>`.
    ///
    /// An empty `file_name` falls back to the name given at init. When
    /// `total_chunks` is supplied it must match the session.
    ///
    /// Nothing is written unless every chunk has been received. If the
    /// destination stream fails, the partial object is discarded and the
    /// session is kept so the call can be repeated.
    pub async fn finalize(
        &self,
        upload_id: &str,
        file_name: &str,
        total_chunks: Option<u32>,
    ) -> Result<ObjectInfo, UploadError> {
        let handle = self.sessions.get(upload_id).await?;
        let mut session = handle.lock().await;
        if session.is_closed() {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }

        let total = total_chunks.unwrap_or(session.total_chunks());
        if total != session.total_chunks() {
            return Err(UploadError::InvalidRequest(format!(
                "totalChunks {total} does not match session ({})",
                session.total_chunks()
            )));
        }
        let received = session.received_count();
        if received != total {
            return Err(UploadError::IncompleteUpload { received, total });
        }

        let file_name = if file_name.is_empty() {
            session.file_name().to_string()
        } else {
            validate_track_name(file_name)?;
            file_name.to_string()
        };
        let object_path = self.object_path(&file_name);

        let mut writer = self
            .store
            .open_write_stream(&object_path, AUDIO_CONTENT_TYPE)
            .await
            .map_err(open_failed)?;

        if let Err(e) = copy_chunks(&session, writer.as_mut()).await {
            writer.abort().await;
            warn!(upload_id, object = %object_path, error = %e, "finalize failed, session kept");
            return Err(e);
        }

        let info = writer.finish().await.map_err(|e| {
            warn!(upload_id, object = %object_path, error = %e, "commit failed, session kept");
            storage_write(e)
        })?;

        if info.size != session.file_size() {
            warn!(
                upload_id,
                declared = session.file_size(),
                stored = info.size,
                "stored size differs from declared size"
            );
        }

        session.close();
        let temp_dir = session.temp_dir().to_path_buf();
        drop(session);
        self.sessions.discard(upload_id, &temp_dir).await;

        info!(upload_id, object = %info.name, size = info.size, "upload finalized");
        Ok(info)
    }
}

async fn copy_chunks(
    session: &UploadSession,
    writer: &mut dyn ObjectWriter,
) -> Result<(), UploadError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    for index in 0..session.total_chunks() {
        let path = session.chunk_path(index);
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            UploadError::StorageWrite(format!("chunk {index} unreadable: {e}"))
        })?;
        loop {
            let n = file.read(&mut buf).await.map_err(|e| {
                UploadError::StorageWrite(format!("chunk {index} unreadable: {e}"))
            })?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await.map_err(storage_write)?;
        }
    }
    Ok(())
}

fn storage_write(e: StorageError) -> UploadError {
    UploadError::StorageWrite(e.to_string())
}

/// Maps a failure to open a destination stream. A path the store refuses
/// is a client error and must not be retried.
pub(crate) fn open_failed(e: StorageError) -> UploadError {
    match e {
        StorageError::InvalidPath(msg) => UploadError::InvalidRequest(msg),
        other => storage_write(other),
    }
}
