//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an
//! empty file (or none at all) yields a working local server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracklift_protocol::{CHUNK_SIZE, TRACKS_PREFIX};
use tracklift_upload_server::ServerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Directory holding finished track objects.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Directory holding chunk files of open sessions.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Base URL embedded in signed direct-upload URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_tracks_prefix")]
    pub tracks_prefix: String,

    /// Idle seconds before an unfinished session is discarded.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_direct_url_ttl_secs")]
    pub direct_url_ttl_secs: u64,

    /// Secret for signing direct-upload URLs. Generated per process when empty.
    #[serde(default)]
    pub signing_secret: String,
}

fn default_bind_addr() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data").join("tracks")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("data").join("uploads")
}

fn default_public_base_url() -> String {
    "http://localhost:8080".into()
}

fn default_tracks_prefix() -> String {
    TRACKS_PREFIX.into()
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    15 * 60
}

fn default_direct_url_ttl_secs() -> u64 {
    15 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage_root: default_storage_root(),
            temp_dir: default_temp_dir(),
            public_base_url: default_public_base_url(),
            tracks_prefix: default_tracks_prefix(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            direct_url_ttl_secs: default_direct_url_ttl_secs(),
            signing_secret: String::new(),
        }
    }
}

impl Config {
    /// Loads `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    /// Runtime settings for the upload server.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr,
            temp_dir: self.temp_dir.clone(),
            tracks_prefix: self.tracks_prefix.clone(),
            max_chunk_bytes: CHUNK_SIZE,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            direct_url_ttl: Duration::from_secs(self.direct_url_ttl_secs),
        }
    }

    /// The configured signing secret, or a fresh random one.
    pub fn signing_secret(&self) -> String {
        if self.signing_secret.is_empty() {
            tracing::warn!("no signing_secret configured, direct-upload URLs expire with this process");
            tracklift_storage::generate_secret()
        } else {
            self.signing_secret.clone()
        }
    }
}
