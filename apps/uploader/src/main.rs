//! Tracklift uploader entry point.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracklift_protocol::{CHUNK_SIZE, MAX_CONCURRENT_UPLOADS};

/// Uploads .wav files to a Tracklift server in resumable chunks.
#[derive(Debug, Parser)]
#[command(name = "tracklift-uploader", version, about)]
pub struct Cli {
    /// Server base URL.
    #[arg(long, env = "TRACKLIFT_SERVER", default_value = "http://localhost:8080")]
    pub server: String,

    /// Queue snapshot file (defaults to the user config directory).
    #[arg(long, env = "TRACKLIFT_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Send small files in one request through a signed URL.
    #[arg(long)]
    pub direct: bool,

    /// Largest file size, in bytes, sent directly when --direct is set.
    #[arg(long, default_value_t = CHUNK_SIZE)]
    pub direct_max_size: u64,

    /// Number of files uploaded at once.
    #[arg(long, default_value_t = MAX_CONCURRENT_UPLOADS)]
    pub concurrency: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue files and wait for every upload to finish.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Finish uploads left in the snapshot by a previous run.
    Resume,
    /// Retry failed uploads from the snapshot.
    Retry,
    /// List stored tracks.
    List,
    /// Delete a stored track.
    Delete { name: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli))
}
