use anyhow::Result;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use sheetmirror::storage::{FileSnapshotStore, MemorySnapshotStore};
use sheetmirror::SyncEngine;
use sheetmirror_api::{Collection, MirrorEvent, Notification};
use sheetmirror_appscript::AppsScriptClient;
use sheetmirror_core::{SnapshotStore, SystemClock};

use crate::config::HeadlessConfig;

/// Load the mirror, keep it reconciled and log what a UI would render,
/// until ctrl-c
pub async fn run(config: HeadlessConfig) -> Result<()> {
    let remote = Arc::new(AppsScriptClient::new(&config.appscript)?);
    let snapshots: Arc<dyn SnapshotStore> = match &config.snapshot_dir {
        Some(dir) => {
            info!("[Launcher] Snapshots in {}", dir.display());
            Arc::new(FileSnapshotStore::new(dir.clone()))
        }
        None => Arc::new(MemorySnapshotStore::new()),
    };

    let engine = SyncEngine::new(remote, snapshots, Arc::new(SystemClock), config.sync)?;

    let mut events = engine.mirror().event_stream();
    let mirror = Arc::clone(engine.mirror());
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(MirrorEvent::RenderRequested { changed }) => {
                    for collection in changed {
                        info!(
                            "[Launcher] Render {} ({} records)",
                            collection,
                            mirror.len(collection)
                        );
                    }
                }
                Ok(MirrorEvent::CollectionReplaced { collection }) => {
                    info!("[Launcher] {} replaced from remote", collection)
                }
                Ok(MirrorEvent::Changed { collection, change }) => {
                    info!("[Launcher] {} changed: {:?}", collection, change)
                }
                Err(e) => warn!("[Launcher] Event feed lagged: {}", e),
            }
        }
    });

    let mut notifications = engine.notifier().subscribe();
    let notification_log = tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match notification {
                Notification::Error(message) => error!("[Launcher] {}", message),
                Notification::Warning(message) => warn!("[Launcher] {}", message),
                other => info!("[Launcher] {:?}", other),
            }
        }
    });

    let handle = engine.start().await;
    for collection in Collection::ALL {
        info!(
            "[Launcher] {}: {} records",
            collection,
            engine.mirror().len(collection)
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("[Launcher] Shutting down");
    handle.shutdown().await;
    engine.context().wait_idle().await;

    event_log.abort();
    notification_log.abort();
    Ok(())
}
