use std::path::PathBuf;
use std::sync::Arc;

use tracklift_upload_queue::{
    FileRef, HttpUploadClient, QueueConfig, QueueEvent, StrategyPolicy, UploadItem, UploadQueue,
    UploadStatus, default_snapshot_path,
};

use crate::{Cli, Command};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = HttpUploadClient::new(&cli.server)?;

    match &cli.command {
        Command::List => {
            for track in client.list_tracks().await? {
                println!("{:>12}  {}", track.size, track.name);
            }
            return Ok(());
        }
        Command::Delete { name } => {
            println!("{}", client.delete_track(name).await?);
            return Ok(());
        }
        Command::Upload { .. } | Command::Resume | Command::Retry => {}
    }

    let queue = UploadQueue::new(Arc::new(client), queue_config(&cli))?;
    let subscription = queue.add_listener(log_event);

    match cli.command {
        Command::Upload { files } => {
            let mut refs = Vec::with_capacity(files.len());
            for path in files {
                refs.push(FileRef::from_path(&path).await?);
            }
            let outcome = queue.add_files(refs);
            for rejected in &outcome.rejected {
                eprintln!("skipped {}: {}", rejected.file.name, rejected.error);
            }
        }
        Command::Retry => {
            let count = queue.retry_failed_uploads();
            tracing::info!(items = count, "failed uploads re-queued");
        }
        _ => {}
    }

    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            let cancelled = queue.cancel_all();
            tracing::info!(items = cancelled, "interrupted, cancelling uploads");
            queue.wait_idle().await;
        }
    }
    subscription.unsubscribe();

    report(&queue.items())
}

fn queue_config(cli: &Cli) -> QueueConfig {
    QueueConfig {
        max_concurrent: cli.concurrency.max(1),
        strategy: StrategyPolicy {
            direct_enabled: cli.direct,
            direct_max_size: cli.direct_max_size,
        },
        snapshot: cli
            .snapshot
            .clone()
            .or_else(default_snapshot_path)
            .or_else(|| Some(PathBuf::from("tracklift-queue.json"))),
        ..QueueConfig::default()
    }
}

fn log_event(event: &QueueEvent) {
    if let QueueEvent::UploadProgress {
        id,
        progress,
        status_text,
    } = event
    {
        tracing::info!(item = %id, progress = %format!("{progress:.0}%"), "{status_text}");
    }
}

fn report(items: &[UploadItem]) -> anyhow::Result<()> {
    let mut failed = 0;
    for item in items {
        match item.status {
            UploadStatus::Completed => println!("uploaded  {}", item.file.name),
            UploadStatus::Cancelled => println!("cancelled {}", item.file.name),
            UploadStatus::Error => {
                failed += 1;
                println!(
                    "failed    {}: {}",
                    item.file.name,
                    item.error.as_deref().unwrap_or("unknown error")
                );
            }
            UploadStatus::Pending | UploadStatus::Uploading => {}
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed; run `tracklift-uploader retry` to try again");
    }
    Ok(())
}
