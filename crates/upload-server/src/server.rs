//! Upload server lifecycle.
//!
//! Binds the HTTP listener, runs the session sweeper alongside it, and
//! shuts both down when the server's cancellation token fires.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracklift_protocol::constants::DIRECT_URL_TTL;
use tracklift_protocol::{CHUNK_SIZE, TRACKS_PREFIX};
use tracklift_storage::{ObjectStore, UrlSigner};

use crate::ServerError;
use crate::routes::{self, AppState};
use crate::session::SessionStore;
use crate::sweeper::spawn_sweeper;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
    /// Directory holding per-session chunk files.
    pub temp_dir: PathBuf,
    /// Object key prefix for finished tracks.
    pub tracks_prefix: String,
    /// Largest accepted chunk payload.
    pub max_chunk_bytes: u64,
    /// Idle time after which an unfinished session is discarded.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    /// Lifetime of signed direct-upload URLs.
    pub direct_url_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
            temp_dir: std::env::temp_dir().join("tracklift-uploads"),
            tracks_prefix: TRACKS_PREFIX.to_string(),
            max_chunk_bytes: CHUNK_SIZE,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
            direct_url_ttl: DIRECT_URL_TTL,
        }
    }
}

/// The Tracklift upload server.
pub struct UploadServer {
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    /// Creates a server storing finished tracks in `store`.
    ///
    /// `signer` enables the direct-upload `PUT` endpoint; it must be the
    /// same signer the store uses to mint URLs.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ObjectStore>,
        signer: Option<UrlSigner>,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionStore::new(config.temp_dir.clone(), config.max_chunk_bytes));
        let state = AppState::new(
            sessions,
            store,
            signer,
            &config.tracks_prefix,
            config.direct_url_ttl,
        );
        Arc::new(Self {
            config,
            state,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");

        let sweeper = spawn_sweeper(
            Arc::clone(&self.state.sessions),
            self.config.sweep_interval,
            self.config.session_ttl,
            self.cancel.child_token(),
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await;

        self.cancel.cancel();
        let _ = sweeper.await;
        tracing::info!("server shut down");
        result.map_err(ServerError::from)
    }
}
