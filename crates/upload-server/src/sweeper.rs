//! Periodic removal of abandoned upload sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionStore;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns a task that sweeps `sessions` every `interval` until `cancel` fires.
///
/// The first sweep runs immediately, which clears directories left behind
/// by a previous process.
pub fn spawn_sweeper(
    sessions: Arc<SessionStore>,
    interval: Duration,
    ttl: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match sessions.sweep(ttl).await {
                        Ok(report) if report.expired_sessions + report.orphan_dirs > 0 => {
                            info!(
                                expired = report.expired_sessions,
                                orphans = report.orphan_dirs,
                                "session sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "session sweep failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_tick_sweeps_orphans_and_cancel_stops() {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path(), 1024));
        let orphan = dir.path().join("stale");
        tokio::fs::create_dir_all(&orphan).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            Arc::clone(&sessions),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        for _ in 0..100 {
            if !orphan.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!orphan.exists());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
