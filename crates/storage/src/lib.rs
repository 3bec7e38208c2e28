//! Object storage collaborator for Tracklift.
//!
//! The upload server never talks to a concrete storage backend directly.
//! It goes through [`ObjectStore`], which offers the five capabilities the
//! pipeline needs: open a write stream, check existence, list by prefix,
//! delete, and sign a short-lived write URL for direct uploads.
//!
//! [`LocalObjectStore`] implements the trait on a plain directory and is
//! used for local deployments and tests.

pub mod local;
pub mod signing;

use std::time::Duration;

use futures_util::future::BoxFuture;

pub use local::LocalObjectStore;
pub use signing::{SignatureError, UrlSigner, generate_secret};

/// Errors produced by object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<tracklift_transfer::TransferError> for StorageError {
    fn from(e: tracklift_transfer::TransferError) -> Self {
        match e {
            tracklift_transfer::TransferError::Io(io) => StorageError::Io(io),
            other => StorageError::InvalidPath(other.to_string()),
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object path (e.g. `tracks/take1.wav`).
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// An open write stream to a single object.
///
/// Bytes written are not visible under the object path until
/// [`finish`](ObjectWriter::finish) succeeds. Dropping or
/// [`abort`](ObjectWriter::abort)ing the writer discards them.
pub trait ObjectWriter: Send {
    /// Appends `data` to the object.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Commits the object and returns its final metadata.
    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<ObjectInfo, StorageError>>;

    /// Discards everything written so far.
    fn abort(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Abstract object storage service.
pub trait ObjectStore: Send + Sync {
    /// Opens a write stream for `path`, replacing any existing object on commit.
    fn open_write_stream<'a>(
        &'a self,
        path: &'a str,
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ObjectWriter>, StorageError>>;

    /// Returns `true` if a committed object exists at `path`.
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Returns metadata for `path`, or `None` if absent.
    fn head<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<ObjectInfo>, StorageError>>;

    /// Lists committed objects whose path starts with `prefix`, sorted by path.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StorageError>>;

    /// Deletes the object at `path`. Fails with [`StorageError::NotFound`] if absent.
    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Returns a URL that accepts `PUT`s of the object body until `ttl`
    /// elapses. Each accepted `PUT` replaces the object.
    fn sign_write_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}
