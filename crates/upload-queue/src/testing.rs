//! Test doubles shared by the worker and queue tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};
use tracklift_protocol::{
    AUDIO_CONTENT_TYPE, ChunkProgress, FinalizeUploadRequest, InitUploadRequest, StoredTrack,
};

use crate::QueueError;
use crate::client::UploadClient;
use crate::types::FileRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init { file_name: String, total_chunks: u32 },
    Chunk { upload_id: String, index: u32, data: Vec<u8> },
    Finalize { upload_id: String, file_name: String },
    UploadUrl { file_name: String },
    PutDirect { size: u64 },
}

/// Records every request. Optional gates hold `init_upload` or
/// `finalize_upload` until the test releases them.
pub struct MockClient {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU32,
    fail_chunk: Mutex<Option<u32>>,
    init_gate: Option<Arc<Semaphore>>,
    finalize_gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            fail_chunk: Mutex::new(None),
            init_gate: None,
            finalize_gate: None,
        }
    }

    /// Each `init_upload` consumes one permit of `gate` before answering.
    pub fn with_init_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.init_gate = Some(gate);
        self
    }

    /// `finalize_upload` signals `entered`, then waits for `release`.
    pub fn with_finalize_gate(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.finalize_gate = Some((entered, release));
        self
    }

    /// The next request for chunk `index` fails with a transport error.
    pub fn fail_chunk_once(&self, index: u32) {
        *self.fail_chunk.lock().unwrap() = Some(index);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn init_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Init { file_name, .. } => Some(file_name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn stored_size(&self, upload_id: &str) -> u64 {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Chunk {
                    upload_id: id,
                    data,
                    ..
                } if id == upload_id => Some(data.len() as u64),
                _ => None,
            })
            .sum()
    }
}

impl UploadClient for MockClient {
    fn init_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> BoxFuture<'a, Result<String, QueueError>> {
        async move {
            self.record(Call::Init {
                file_name: req.file_name.clone(),
                total_chunks: req.total_chunks,
            });
            if let Some(gate) = &self.init_gate {
                gate.acquire()
                    .await
                    .map_err(|e| QueueError::Transport(e.to_string()))?
                    .forget();
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("upload-{n}"))
        }
        .boxed()
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<ChunkProgress, QueueError>> {
        async move {
            {
                let mut fail = self.fail_chunk.lock().unwrap();
                if *fail == Some(chunk_index) {
                    *fail = None;
                    return Err(QueueError::Transport("connection reset".into()));
                }
            }
            self.record(Call::Chunk {
                upload_id: upload_id.to_string(),
                index: chunk_index,
                data,
            });
            Ok(ChunkProgress {
                received: chunk_index + 1,
                total: total_chunks,
            })
        }
        .boxed()
    }

    fn finalize_upload<'a>(
        &'a self,
        req: &'a FinalizeUploadRequest,
    ) -> BoxFuture<'a, Result<StoredTrack, QueueError>> {
        async move {
            self.record(Call::Finalize {
                upload_id: req.upload_id.clone(),
                file_name: req.file_name.clone(),
            });
            if let Some((entered, release)) = &self.finalize_gate {
                entered.notify_one();
                release.notified().await;
            }
            Ok(StoredTrack {
                name: req.file_name.clone(),
                size: self.stored_size(&req.upload_id),
            })
        }
        .boxed()
    }

    fn get_upload_url<'a>(
        &'a self,
        file_name: &'a str,
    ) -> BoxFuture<'a, Result<String, QueueError>> {
        async move {
            self.record(Call::UploadUrl {
                file_name: file_name.to_string(),
            });
            Ok(format!("http://mock/api/direct-upload/tracks/{file_name}?expires=0&signature=x"))
        }
        .boxed()
    }

    fn put_direct<'a>(
        &'a self,
        _signed_url: &'a str,
        _path: &'a Path,
        size: u64,
    ) -> BoxFuture<'a, Result<(), QueueError>> {
        async move {
            self.record(Call::PutDirect { size });
            Ok(())
        }
        .boxed()
    }
}

/// Writes `contents` to `dir/name` and returns its [`FileRef`].
pub async fn wav_file(dir: &TempDir, name: &str, contents: &[u8]) -> FileRef {
    let path = dir.path().join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    let file = FileRef::from_path(&path).await.unwrap();
    assert_eq!(file.content_type, AUDIO_CONTENT_TYPE);
    file
}
