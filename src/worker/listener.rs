//! Worker-side intake (spec.md §4.2): merges spool replay and live IPC
//! traffic into the single bounded enrichment channel. At startup, every
//! `*.jsonl` file in the spool directory is replayed in chronological order
//! before IPC acceptors start serving, so the record order a restarted
//! worker enrichment-consumer sees never interleaves stale spool records
//! ahead of a record that arrived after the restart.

use crate::config::Config;
use crate::record::TrackingRecord;
use notify::{RecursiveMode, Watcher};
use std::time::Duration;
use tokio::sync::mpsc;

const POLL_BACKSTOP_INTERVAL: Duration = Duration::from_secs(300);

/// Replay everything currently sitting in the spool, then start the IPC
/// acceptors and the filesystem watcher. Returns once the initial replay is
/// done; the watcher and acceptors continue running in background tasks.
pub async fn start(config: &Config, tx: mpsc::Sender<TrackingRecord>) -> anyhow::Result<()> {
    rescan_spool(&config.spool_directory, &tx).await?;

    crate::ipc::spawn_acceptors(&config.ipc_socket_path, config.ipc_acceptors, tx.clone())?;
    spawn_watcher(config.spool_directory.clone(), tx.clone());
    spawn_poll_backstop(config.spool_directory.clone(), tx);
    Ok(())
}

async fn rescan_spool(directory: &str, tx: &mpsc::Sender<TrackingRecord>) -> anyhow::Result<()> {
    let mut collected = Vec::new();
    let replayed = crate::spool::replay_all(directory, |record| collected.push(record)).await?;
    if replayed > 0 {
        tracing::info!("worker: replayed {replayed} spooled records from {directory}");
    }
    for record in collected {
        if tx.send(record).await.is_err() {
            tracing::warn!("worker: enrichment channel closed during spool replay");
            break;
        }
    }
    Ok(())
}

/// Filesystem change-notification subscription (spec.md §4.2): debounced to
/// avoid a rescan storm when the Edge rotates spool files under load.
fn spawn_watcher(directory: String, tx: mpsc::Sender<TrackingRecord>) {
    tokio::spawn(async move {
        let (notify_tx, mut notify_rx) = mpsc::channel(16);
        let watcher_result = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if event.is_ok() {
                let _ = notify_tx.try_send(());
            }
        });
        let Ok(mut watcher) = watcher_result else {
            tracing::warn!("worker: failed to create spool watcher, relying on poll backstop only");
            return;
        };
        if watcher.watch(std::path::Path::new(&directory), RecursiveMode::NonRecursive).is_err() {
            tracing::warn!("worker: failed to watch spool directory {directory}");
            return;
        }

        while notify_rx.recv().await.is_some() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            while notify_rx.try_recv().is_ok() {}
            if let Err(e) = rescan_spool(&directory, &tx).await {
                tracing::warn!("worker: spool rescan failed: {e}");
            }
        }
    });
}

/// 5-minute poll backstop for dropped filesystem notifications (spec.md
/// §4.2).
fn spawn_poll_backstop(directory: String, tx: mpsc::Sender<TrackingRecord>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POLL_BACKSTOP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = rescan_spool(&directory, &tx).await {
                tracing::warn!("worker: poll-backstop spool rescan failed: {e}");
            }
        }
    });
}

