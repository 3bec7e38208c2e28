use std::sync::Arc;

use tracklift_storage::{LocalObjectStore, UrlSigner};
use tracklift_upload_server::UploadServer;

use crate::config::Config;

/// Runs the server until Ctrl+C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let signer = UrlSigner::new(config.signing_secret(), config.public_base_url.as_str());
    let store = LocalObjectStore::new(&config.storage_root).with_signer(signer.clone());

    let purged = store.purge_partials().await?;
    if purged > 0 {
        tracing::info!(count = purged, "removed partial objects from a previous run");
    }

    let server = UploadServer::new(config.server_config(), Arc::new(store), Some(signer));
    let mut runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = &mut runner => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown();
    runner.await??;
    Ok(())
}
