//! Transfer worker: moves one file to the server.
//!
//! A worker owns nothing of the queue. It reports through a one-way channel
//! of `(item_id, TransferEvent)` and observes a [`CancellationToken`] between
//! chunks. The last event it sends is always terminal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracklift_protocol::{CHUNK_PROGRESS_CEILING, FinalizeUploadRequest, InitUploadRequest};
use tracklift_transfer::{ChunkReader, plan};

use crate::QueueError;
use crate::client::UploadClient;
use crate::strategy::UploadStrategy;
use crate::types::{FileRef, TransferEvent};

/// Channel carrying worker events to the queue.
pub type EventSender = mpsc::Sender<(String, TransferEvent)>;

enum Outcome {
    Completed { path: String, size: u64 },
    Cancelled,
}

/// Progress after `sent` of `total` chunks, capped below 100 until finalize.
pub fn chunk_progress(sent: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (f64::from(sent) / f64::from(total) * CHUNK_PROGRESS_CEILING).min(CHUNK_PROGRESS_CEILING)
}

/// Uploads one queue item.
pub struct TransferWorker {
    item_id: String,
    file: FileRef,
    client: Arc<dyn UploadClient>,
    chunk_size: u64,
    strategy: UploadStrategy,
    events: EventSender,
    cancel: CancellationToken,
}

impl TransferWorker {
    pub fn new(
        item_id: String,
        file: FileRef,
        client: Arc<dyn UploadClient>,
        chunk_size: u64,
        strategy: UploadStrategy,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            item_id,
            file,
            client,
            chunk_size,
            strategy,
            events,
            cancel,
        }
    }

    /// Runs the transfer to a terminal event.
    pub async fn run(self) {
        self.emit(TransferEvent::Started).await;

        let result = match self.strategy {
            UploadStrategy::Chunked => self.upload_chunked().await,
            UploadStrategy::Direct => self.upload_direct().await,
        };

        let event = match result {
            Ok(Outcome::Completed { path, size }) => {
                info!(item = %self.item_id, file = %self.file.name, size, "upload completed");
                TransferEvent::Completed { path, size }
            }
            Ok(Outcome::Cancelled) => {
                info!(item = %self.item_id, file = %self.file.name, "upload cancelled");
                TransferEvent::Cancelled
            }
            Err(e) => {
                warn!(item = %self.item_id, file = %self.file.name, error = %e, "upload failed");
                TransferEvent::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: TransferEvent) {
        if self.events.send((self.item_id.clone(), event)).await.is_err() {
            debug!(item = %self.item_id, "queue dropped, event discarded");
        }
    }

    async fn progress(&self, percent: f64, text: impl Into<String>) {
        self.emit(TransferEvent::Progress {
            percent,
            text: text.into(),
        })
        .await;
    }

    async fn open_source(&self) -> Result<ChunkReader, QueueError> {
        let reader = ChunkReader::open(&self.file.path).await?;
        if reader.file_size() != self.file.size {
            return Err(QueueError::Validation(format!(
                "{} changed size since it was queued ({} -> {} bytes)",
                self.file.name,
                self.file.size,
                reader.file_size()
            )));
        }
        Ok(reader)
    }

    async fn upload_chunked(&self) -> Result<Outcome, QueueError> {
        let mut reader = self.open_source().await?;
        let ranges = plan(self.file.size, self.chunk_size);
        let total = ranges.len() as u32;

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        self.progress(0.0, "Initializing upload").await;
        let upload_id = self
            .client
            .init_upload(&InitUploadRequest {
                file_name: self.file.name.clone(),
                file_size: self.file.size,
                total_chunks: total,
            })
            .await?;
        debug!(item = %self.item_id, upload_id = %upload_id, chunks = total, "session opened");

        for range in ranges {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let position = range.index + 1;
            let text = format!("Uploading chunk {position} of {total}");
            self.progress(chunk_progress(range.index, total), text.clone())
                .await;

            let data = reader.read(range).await?;
            self.client
                .upload_chunk(&upload_id, range.index, total, data)
                .await?;

            self.progress(chunk_progress(position, total), text).await;
        }

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Past this point a cancel no longer stops the server from storing
        // the object.
        self.progress(CHUNK_PROGRESS_CEILING, "Finalizing").await;
        let track = self
            .client
            .finalize_upload(&FinalizeUploadRequest {
                upload_id,
                file_name: self.file.name.clone(),
                total_chunks: Some(total),
            })
            .await?;

        Ok(Outcome::Completed {
            path: track.name,
            size: track.size,
        })
    }

    async fn upload_direct(&self) -> Result<Outcome, QueueError> {
        drop(self.open_source().await?);

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        self.progress(0.0, "Requesting upload URL").await;
        let signed_url = self.client.get_upload_url(&self.file.name).await?;

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        self.progress(0.0, "Uploading").await;
        self.client
            .put_direct(&signed_url, &self.file.path, self.file.size)
            .await?;

        Ok(Outcome::Completed {
            path: self.file.name.clone(),
            size: self.file.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockClient, wav_file};
    use tempfile::TempDir;

    async fn run_worker(
        client: Arc<MockClient>,
        file: FileRef,
        strategy: UploadStrategy,
        cancel: CancellationToken,
    ) -> Vec<TransferEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        let worker = TransferWorker::new("item-1".into(), file, client, 4, strategy, tx, cancel);
        worker.run().await;

        let mut events = Vec::new();
        while let Ok((id, event)) = rx.try_recv() {
            assert_eq!(id, "item-1");
            events.push(event);
        }
        events
    }

    #[test]
    fn progress_is_capped_at_ceiling() {
        assert_eq!(chunk_progress(0, 4), 0.0);
        assert_eq!(chunk_progress(2, 4), 45.0);
        assert_eq!(chunk_progress(4, 4), CHUNK_PROGRESS_CEILING);
        assert_eq!(chunk_progress(5, 4), CHUNK_PROGRESS_CEILING);
        assert_eq!(chunk_progress(0, 0), 0.0);
    }

    #[tokio::test]
    async fn chunked_upload_sends_every_chunk_in_order() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "take.wav", b"AAAABBBBCC").await;
        let client = Arc::new(MockClient::new());

        let events = run_worker(
            Arc::clone(&client),
            file,
            UploadStrategy::Chunked,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(events.first(), Some(&TransferEvent::Started));
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed {
                path: "take.wav".into(),
                size: 10
            })
        );

        let calls = client.calls();
        assert_eq!(
            calls,
            vec![
                Call::Init {
                    file_name: "take.wav".into(),
                    total_chunks: 3
                },
                Call::Chunk {
                    upload_id: "upload-1".into(),
                    index: 0,
                    data: b"AAAA".to_vec()
                },
                Call::Chunk {
                    upload_id: "upload-1".into(),
                    index: 1,
                    data: b"BBBB".to_vec()
                },
                Call::Chunk {
                    upload_id: "upload-1".into(),
                    index: 2,
                    data: b"CC".to_vec()
                },
                Call::Finalize {
                    upload_id: "upload-1".into(),
                    file_name: "take.wav".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn progress_never_decreases_and_stays_below_finalize() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "take.wav", &[7u8; 16]).await;
        let client = Arc::new(MockClient::new());

        let events = run_worker(client, file, UploadStrategy::Chunked, CancellationToken::new()).await;

        let percents: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|p| *p <= CHUNK_PROGRESS_CEILING));
        assert!(events.iter().any(|e| matches!(
            e,
            TransferEvent::Progress { text, .. } if text == "Uploading chunk 4 of 4"
        )));
    }

    #[tokio::test]
    async fn empty_file_sends_one_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "silence.wav", b"").await;
        let client = Arc::new(MockClient::new());

        run_worker(
            Arc::clone(&client),
            file,
            UploadStrategy::Chunked,
            CancellationToken::new(),
        )
        .await;

        let chunks: Vec<_> = client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Chunk { .. }))
            .collect();
        assert_eq!(
            chunks,
            vec![Call::Chunk {
                upload_id: "upload-1".into(),
                index: 0,
                data: Vec::new()
            }]
        );
    }

    #[tokio::test]
    async fn chunk_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "take.wav", &[1u8; 16]).await;
        let client = Arc::new(MockClient::new());
        client.fail_chunk_once(1);

        let events = run_worker(
            Arc::clone(&client),
            file,
            UploadStrategy::Chunked,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(events.last(), Some(TransferEvent::Failed { .. })));
        assert!(!client
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Finalize { .. })));
    }

    #[tokio::test]
    async fn changed_source_size_fails_before_any_request() {
        let dir = TempDir::new().unwrap();
        let mut file = wav_file(&dir, "take.wav", b"1234").await;
        file.size = 99;
        let client = Arc::new(MockClient::new());

        let events = run_worker(
            Arc::clone(&client),
            file,
            UploadStrategy::Chunked,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(events.last(), Some(TransferEvent::Failed { .. })));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_requests() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "take.wav", b"1234").await;
        let client = Arc::new(MockClient::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events = run_worker(Arc::clone(&client), file, UploadStrategy::Chunked, cancel).await;

        assert_eq!(events.last(), Some(&TransferEvent::Cancelled));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn direct_upload_skips_sessions() {
        let dir = TempDir::new().unwrap();
        let file = wav_file(&dir, "hit.wav", b"RIFF").await;
        let client = Arc::new(MockClient::new());

        let events = run_worker(
            Arc::clone(&client),
            file,
            UploadStrategy::Direct,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed {
                path: "hit.wav".into(),
                size: 4
            })
        );
        assert_eq!(
            client.calls(),
            vec![
                Call::UploadUrl {
                    file_name: "hit.wav".into()
                },
                Call::PutDirect { size: 4 },
            ]
        );
    }
}
