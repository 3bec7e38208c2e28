//! Upload queue manager.
//!
//! Owns every queue item and the transfer workers. Workers report over an
//! mpsc channel; a pump task applies their events to the queue state, and
//! listeners are notified after the state lock is released.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracklift_protocol::{CHUNK_SIZE, MAX_CONCURRENT_UPLOADS};
use tracklift_transfer::validate_track_name;

use crate::QueueError;
use crate::client::UploadClient;
use crate::snapshot::{SnapshotStore, restore_items};
use crate::strategy::StrategyPolicy;
use crate::types::{
    AddFilesOutcome, FileRef, QueueCounts, QueueEvent, RejectedFile, TransferEvent, UploadItem,
    UploadStatus,
};
use crate::worker::{EventSender, TransferWorker};

/// Capacity of the worker event channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Transfers allowed in flight at once.
    pub max_concurrent: usize,
    pub chunk_size: u64,
    pub strategy: StrategyPolicy,
    /// Where the queue snapshot is kept. `None` keeps the queue in memory only.
    pub snapshot: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_UPLOADS,
            chunk_size: CHUNK_SIZE,
            strategy: StrategyPolicy::default(),
            snapshot: None,
        }
    }
}

type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    items: Vec<UploadItem>,
    /// Cancel tokens of workers still running, keyed by item id. An entry
    /// is removed only when its worker reports a terminal event, so a
    /// cancelled upload holds its slot until the worker exits.
    workers: HashMap<String, CancellationToken>,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.workers.is_empty() && !self.items.iter().any(|i| i.status.is_active())
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut UploadItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Index of the oldest pending item.
    fn next_pending(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.status == UploadStatus::Pending)
            .min_by_key(|(_, i)| i.added_at)
            .map(|(idx, _)| idx)
    }
}

struct Inner {
    state: Mutex<QueueState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    client: Arc<dyn UploadClient>,
    config: QueueConfig,
    snapshot: Option<SnapshotStore>,
    events_tx: EventSender,
    idle_tx: watch::Sender<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for cancel in self.lock().workers.values() {
            cancel.cancel();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persists the state and refreshes the idle flag. Returns the
    /// notification describing the new state.
    fn commit(&self, state: &QueueState) -> QueueEvent {
        if let Some(store) = &self.snapshot
            && let Err(e) = store.save(&state.items)
        {
            warn!(path = ?store.path(), error = %e, "failed to persist upload queue");
        }
        self.idle_tx.send_replace(state.is_idle());
        QueueEvent::QueueUpdated(state.items.clone())
    }

    fn emit(&self, event: QueueEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!("upload queue listener panicked");
            }
        }
    }

    /// Starts workers for the oldest pending items while slots are free.
    fn drain(&self) -> Option<QueueEvent> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let limit = self.config.max_concurrent.max(1);
        let mut started = 0;

        while state.workers.len() < limit {
            let Some(idx) = state.next_pending() else {
                break;
            };
            let item = &mut state.items[idx];
            item.status = UploadStatus::Uploading;
            item.progress = 0.0;
            item.error = None;
            item.status_text = "Starting".into();
            item.started_at.get_or_insert_with(Utc::now);

            let cancel = CancellationToken::new();
            state.workers.insert(item.id.clone(), cancel.clone());
            self.spawn_worker(item.id.clone(), item.file.clone(), cancel);
            started += 1;
        }

        (started > 0).then(|| self.commit(state))
    }

    fn spawn_worker(&self, id: String, file: FileRef, cancel: CancellationToken) {
        let strategy = self.config.strategy.choose(file.size);
        debug!(item = %id, file = %file.name, ?strategy, "starting transfer");

        let worker = TransferWorker::new(
            id.clone(),
            file,
            Arc::clone(&self.client),
            self.config.chunk_size,
            strategy,
            self.events_tx.clone(),
            cancel,
        );
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if AssertUnwindSafe(worker.run()).catch_unwind().await.is_err() {
                error!(item = %id, "transfer worker panicked");
                let _ = events
                    .send((
                        id,
                        TransferEvent::Failed {
                            reason: "transfer worker panicked".into(),
                        },
                    ))
                    .await;
            }
        });
    }

    /// Applies one worker event. Returns the notifications to deliver.
    fn on_transfer_event(&self, id: &str, event: TransferEvent) -> Vec<QueueEvent> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let terminal = event.is_terminal();
        if terminal {
            state.workers.remove(id);
        }

        let Some(item) = state.find_mut(id) else {
            debug!(item = %id, "event for removed item");
            return if terminal {
                vec![self.commit(state)]
            } else {
                Vec::new()
            };
        };
        let uploading = item.status == UploadStatus::Uploading;

        match event {
            TransferEvent::Started | TransferEvent::Progress { .. } if !uploading => Vec::new(),
            TransferEvent::Started => {
                item.status_text = "Starting upload".into();
                vec![progress_event(item)]
            }
            TransferEvent::Progress { percent, text } => {
                item.progress = item.progress.max(percent.clamp(0.0, 100.0));
                item.status_text = text;
                vec![progress_event(item)]
            }
            TransferEvent::Completed { path, size } => {
                if uploading {
                    item.status = UploadStatus::Completed;
                    item.progress = 100.0;
                    item.status_text = format!("Uploaded {path}");
                    item.completed_at = Some(Utc::now());
                } else {
                    info!(
                        item = %id,
                        object = %path,
                        size,
                        "upload finished on the server after it was cancelled"
                    );
                }
                vec![self.commit(state)]
            }
            TransferEvent::Failed { reason } => {
                if uploading {
                    item.status = UploadStatus::Error;
                    item.status_text = "Upload failed".into();
                    item.error = Some(reason);
                }
                vec![self.commit(state)]
            }
            TransferEvent::Cancelled => {
                if uploading {
                    item.status = UploadStatus::Cancelled;
                    item.status_text = "Cancelled".into();
                }
                vec![self.commit(state)]
            }
        }
    }
}

fn progress_event(item: &UploadItem) -> QueueEvent {
    QueueEvent::UploadProgress {
        id: item.id.clone(),
        progress: item.progress,
        status_text: item.status_text.clone(),
    }
}

fn spawn_event_pump(inner: Weak<Inner>, mut rx: mpsc::Receiver<(String, TransferEvent)>) {
    tokio::spawn(async move {
        while let Some((id, event)) = rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let terminal = event.is_terminal();
            for notification in inner.on_transfer_event(&id, event) {
                inner.emit(notification);
            }
            if terminal && let Some(notification) = inner.drain() {
                inner.emit(notification);
            }
        }
        debug!("upload queue event pump stopped");
    });
}

/// Handle returned by [`UploadQueue::add_listener`].
///
/// The listener stays registered until [`unsubscribe`](Self::unsubscribe)
/// is called, even if this handle is dropped.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Client-side upload queue.
///
/// Cloning yields another handle to the same queue. Must be created inside
/// a tokio runtime.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

impl UploadQueue {
    /// Creates the queue, restoring the snapshot if one is configured, and
    /// starts any restored pending items.
    pub fn new(client: Arc<dyn UploadClient>, config: QueueConfig) -> Result<Self, QueueError> {
        let snapshot = config.snapshot.clone().map(SnapshotStore::new);
        let items = match &snapshot {
            Some(store) => restore_items(store.load()?),
            None => Vec::new(),
        };
        let restored = items.len();

        let state = QueueState {
            items,
            workers: HashMap::new(),
        };
        let (idle_tx, _) = watch::channel(state.is_idle());
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);

        let inner = Arc::new(Inner {
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            client,
            config,
            snapshot,
            events_tx,
            idle_tx,
        });
        spawn_event_pump(Arc::downgrade(&inner), events_rx);

        if restored > 0 {
            info!(items = restored, "upload queue restored");
            let guard = inner.lock();
            inner.commit(&guard);
        }

        let queue = Self { inner };
        queue.process_queue();
        Ok(queue)
    }

    /// Queues files for upload.
    ///
    /// Each file needs a safe `.wav` name that no pending or uploading item
    /// already uses. Accepted files become pending items and the queue is
    /// drained.
    pub fn add_files(&self, files: impl IntoIterator<Item = FileRef>) -> AddFilesOutcome {
        let mut outcome = AddFilesOutcome::default();

        let event = {
            let mut state = self.inner.lock();
            for file in files {
                match check_new_file(&state, &file) {
                    Ok(()) => {
                        let item = UploadItem::new(file);
                        info!(item = %item.id, file = %item.file.name, size = item.file.size, "file queued");
                        outcome.accepted.push(item.id.clone());
                        state.items.push(item);
                    }
                    Err(error) => {
                        warn!(file = %file.name, error = %error, "file rejected");
                        outcome.rejected.push(RejectedFile { file, error });
                    }
                }
            }
            (!outcome.accepted.is_empty()).then(|| self.inner.commit(&state))
        };

        if let Some(event) = event {
            self.inner.emit(event);
        }
        self.process_queue();
        outcome
    }

    /// Starts pending items while fewer than `max_concurrent` transfers run.
    pub fn process_queue(&self) {
        if let Some(event) = self.inner.drain() {
            self.inner.emit(event);
        }
    }

    /// Cancels a pending or uploading item.
    ///
    /// A pending item never touches the network. An uploading item stops at
    /// the next chunk boundary; if it is already finalizing, the server may
    /// still store the track even though the item stays cancelled.
    ///
    /// Returns `false` if the item had already finished.
    pub fn cancel_upload(&self, id: &str) -> Result<bool, QueueError> {
        let event = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let item = state
                .items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            if !cancel_item(item, &state.workers) {
                return Ok(false);
            }
            self.inner.commit(state)
        };
        self.inner.emit(event);
        Ok(true)
    }

    /// Cancels every pending and uploading item. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let (count, event) = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let mut count = 0;
            for item in state.items.iter_mut() {
                if cancel_item(item, &state.workers) {
                    count += 1;
                }
            }
            (count, (count > 0).then(|| self.inner.commit(state)))
        };
        if let Some(event) = event {
            self.inner.emit(event);
        }
        count
    }

    /// Moves every failed item back to pending with progress reset, then
    /// drains. Each retried item starts over on a fresh server session.
    pub fn retry_failed_uploads(&self) -> usize {
        let (count, event) = {
            let mut state = self.inner.lock();
            let mut count = 0;
            for item in state
                .items
                .iter_mut()
                .filter(|i| i.status == UploadStatus::Error)
            {
                item.status = UploadStatus::Pending;
                item.progress = 0.0;
                item.error = None;
                item.status_text = "Waiting (retry)".into();
                count += 1;
            }
            (count, (count > 0).then(|| self.inner.commit(&state)))
        };

        if let Some(event) = event {
            info!(items = count, "retrying failed uploads");
            self.inner.emit(event);
        }
        self.process_queue();
        count
    }

    /// Removes a finished item. Returns `false` while it is still active.
    pub fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let event = {
            let mut state = self.inner.lock();
            let idx = state
                .items
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            if state.items[idx].status.is_active() {
                return Ok(false);
            }
            state.items.remove(idx);
            self.inner.commit(&state)
        };
        self.inner.emit(event);
        Ok(true)
    }

    /// Drops completed and cancelled items. Failed items stay for retry.
    pub fn clear_finished(&self) -> usize {
        let (count, event) = {
            let mut state = self.inner.lock();
            let before = state.items.len();
            state.items.retain(|i| {
                !matches!(i.status, UploadStatus::Completed | UploadStatus::Cancelled)
            });
            let count = before - state.items.len();
            (count, (count > 0).then(|| self.inner.commit(&state)))
        };
        if let Some(event) = event {
            self.inner.emit(event);
        }
        count
    }

    /// Registers a listener called on every queue change.
    ///
    /// Listeners run synchronously on the thread that made the change, with
    /// no queue lock held. A panicking listener is logged and skipped.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Snapshot of every item in queue order.
    pub fn items(&self) -> Vec<UploadItem> {
        self.inner.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.inner.lock().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.inner.lock();
        let mut counts = QueueCounts::default();
        for item in &state.items {
            match item.status {
                UploadStatus::Pending => counts.pending += 1,
                UploadStatus::Uploading => counts.uploading += 1,
                UploadStatus::Completed => counts.completed += 1,
                UploadStatus::Error => counts.error += 1,
                UploadStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Resolves once nothing is pending or uploading and every worker has exited.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

fn check_new_file(state: &QueueState, file: &FileRef) -> Result<(), QueueError> {
    validate_track_name(&file.name)?;
    let duplicate = state
        .items
        .iter()
        .any(|i| i.status.is_active() && i.file.name == file.name);
    if duplicate {
        return Err(QueueError::Duplicate(file.name.clone()));
    }
    Ok(())
}

/// Marks an active item cancelled and signals its worker. Returns `false`
/// for finished items.
fn cancel_item(item: &mut UploadItem, workers: &HashMap<String, CancellationToken>) -> bool {
    match item.status {
        UploadStatus::Pending => {}
        UploadStatus::Uploading => {
            if let Some(cancel) = workers.get(&item.id) {
                cancel.cancel();
            }
        }
        _ => return false,
    }
    item.status = UploadStatus::Cancelled;
    item.status_text = "Cancelled".into();
    info!(item = %item.id, file = %item.file.name, "upload cancelled");
    true
}
