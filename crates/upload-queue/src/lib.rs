//! Client side of the Tracklift upload pipeline.
//!
//! [`UploadQueue`] accepts local `.wav` files, runs at most a fixed number of
//! [`TransferWorker`]s at once, and keeps a durable snapshot so interrupted
//! uploads restart after a crash. Workers talk to the server through the
//! [`UploadClient`] seam; [`HttpUploadClient`] is the production transport.

mod client;
mod error;
mod queue;
mod snapshot;
mod strategy;
mod types;
mod worker;

#[cfg(test)]
mod testing;

pub use client::{HttpUploadClient, UploadClient};
pub use error::QueueError;
pub use queue::{QueueConfig, Subscription, UploadQueue};
pub use snapshot::{SnapshotStore, default_snapshot_path, restore_items};
pub use strategy::{StrategyPolicy, UploadStrategy};
pub use types::{
    AddFilesOutcome, FileRef, QueueCounts, QueueEvent, RejectedFile, TransferEvent, UploadItem,
    UploadStatus,
};
pub use worker::{EventSender, TransferWorker, chunk_progress};
