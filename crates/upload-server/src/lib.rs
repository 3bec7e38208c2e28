//! Server side of the Tracklift upload pipeline.
//!
//! Clients open a session, send a file as numbered chunks in any order, and
//! finalize it once every chunk is stored. The [`Finalizer`] then streams
//! the chunks in index order into an [`ObjectStore`](tracklift_storage::ObjectStore).
//! Small files can skip sessions entirely through a signed direct-upload URL.

mod error;
mod finalize;
mod routes;
mod server;
mod session;
mod sweeper;

pub use error::UploadError;
pub use finalize::Finalizer;
pub use routes::{AppState, router};
pub use server::{ServerConfig, UploadServer};
pub use session::{SessionHandle, SessionStore, SweepReport, UploadSession};
pub use sweeper::spawn_sweeper;

/// Errors produced while running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
