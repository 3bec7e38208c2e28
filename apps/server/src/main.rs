//! Tracklift upload server entry point.

mod app;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Receives chunked and direct audio uploads and stores them as tracks.
#[derive(Debug, Parser)]
#[command(name = "tracklift-server", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "TRACKLIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the file.
    #[arg(long, env = "TRACKLIFT_BIND")]
    bind: Option<SocketAddr>,

    /// Directory where finished tracks are stored.
    #[arg(long, env = "TRACKLIFT_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Base URL clients use to reach this server (for signed upload URLs).
    #[arg(long, env = "TRACKLIFT_PUBLIC_URL")]
    public_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Tracklift upload server"
    );

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }
    if let Some(url) = cli.public_url {
        config.public_base_url = url;
    }
    tracing::info!(
        bind = %config.bind_addr,
        storage = %config.storage_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
