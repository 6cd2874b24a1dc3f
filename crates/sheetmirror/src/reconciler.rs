//! Periodic Reconciler
//!
//! Refetches every collection on a fixed cadence and swaps in the ones whose
//! serialized content changed. A cycle is skipped during the post-write
//! cooldown or while any operation is in flight, and aborted without touching
//! the mirror if any read degraded.

use std::sync::Arc;

use sheetmirror_api::{Collection, Record};
use sheetmirror_core::SnapshotStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::gateway::{Gateway, SheetRead};
use crate::mirror::{Mirror, ReconcileResult};
use crate::storage::snapshot_store::{load_records, save_collection};
use crate::sync_context::{SkipReason, SyncContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    /// At least one read degraded; nothing was applied
    Aborted { failed: Vec<Collection> },
    Unchanged,
    Applied(Vec<Collection>),
}

pub struct Reconciler {
    gateway: Arc<Gateway>,
    mirror: Arc<Mirror>,
    ctx: Arc<SyncContext>,
    snapshots: Arc<dyn SnapshotStore>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<Gateway>,
        mirror: Arc<Mirror>,
        ctx: Arc<SyncContext>,
        snapshots: Arc<dyn SnapshotStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            mirror,
            ctx,
            snapshots,
            config,
        }
    }

    /// Restore snapshotted collections that have not been fetched yet.
    ///
    /// Returns the collections restored. Unreadable snapshots are skipped.
    pub async fn warm_start(&self) -> Vec<Collection> {
        let mut restored = Vec::new();
        for collection in Collection::ALL {
            if !collection.schema().snapshotted || self.mirror.is_loaded(collection) {
                continue;
            }
            match load_records(self.snapshots.as_ref(), collection).await {
                Ok(Some(records)) => {
                    debug!(
                        "[Reconciler] Restored {} {} from snapshot",
                        records.len(),
                        collection
                    );
                    self.mirror.set(collection, records);
                    restored.push(collection);
                }
                Ok(None) => {}
                Err(e) => warn!("[Reconciler] Ignoring snapshot of {}: {}", collection, e),
            }
        }
        if !restored.is_empty() {
            self.mirror.request_render(restored.clone());
        }
        restored
    }

    /// First fetch of every collection.
    ///
    /// Complete reads are applied without waiting for the cooldown. A
    /// degraded read fills a collection with nothing only if it has no
    /// content yet, so a warm start is not thrown away by a flaky first
    /// fetch. Collections with writes in flight keep their optimistic
    /// content; the next cycle picks them up.
    #[tracing::instrument(name = "reconciler.initial_load", skip(self))]
    pub async fn initial_load(&self) -> Vec<Collection> {
        let reads = self.gateway.read_all().await;
        let mut complete = Vec::new();
        let fetched = reads
            .into_iter()
            .map(|read: SheetRead| {
                if read.complete {
                    complete.push(read.collection);
                    (read.collection, Some(read.records))
                } else {
                    warn!(
                        "[Reconciler] {} could not be read; keeping any restored content",
                        read.collection
                    );
                    (read.collection, None)
                }
            })
            .collect();

        let loaded = self
            .mirror
            .load(fetched, |collection| self.ctx.pending_for(collection) > 0);
        for collection in loaded.iter().filter(|c| complete.contains(c)) {
            save_collection(self.snapshots.as_ref(), &self.mirror, *collection).await;
        }
        info!("[Reconciler] Initial load populated {} collections", loaded.len());
        self.mirror.request_render(loaded.clone());
        loaded
    }

    /// One reconcile cycle
    #[tracing::instrument(name = "reconciler.run_cycle", skip(self))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cooldown = self.config.cooldown();
        if let Some(reason) = self.ctx.suppression(cooldown) {
            debug!("[Reconciler] Skipping cycle: {:?}", reason);
            return CycleOutcome::Skipped(reason);
        }

        let reads = self.gateway.read_all().await;
        let failed: Vec<Collection> = reads
            .iter()
            .filter(|read| !read.complete)
            .map(|read| read.collection)
            .collect();
        if !failed.is_empty() {
            warn!(
                "[Reconciler] Aborting cycle, {} collections could not be read: {:?}",
                failed.len(),
                failed
            );
            return CycleOutcome::Aborted { failed };
        }

        let fetched: Vec<(Collection, Vec<Record>)> = reads
            .into_iter()
            .map(|read| (read.collection, read.records))
            .collect();

        // Re-checked under the mirror lock: a write may have started mid-fetch
        match self
            .mirror
            .reconcile(fetched, || self.ctx.suppression(cooldown))
        {
            ReconcileResult::Suppressed(reason) => {
                debug!("[Reconciler] Dropping fetched data: {:?}", reason);
                CycleOutcome::Skipped(reason)
            }
            ReconcileResult::Applied(changed) if changed.is_empty() => {
                debug!("[Reconciler] No collection changed");
                CycleOutcome::Unchanged
            }
            ReconcileResult::Applied(changed) => {
                info!("[Reconciler] Replaced {:?}", changed);
                for collection in &changed {
                    save_collection(self.snapshots.as_ref(), &self.mirror, *collection).await;
                }
                self.mirror.request_render(changed.clone());
                CycleOutcome::Applied(changed)
            }
        }
    }

    /// Run cycles on the configured interval until shut down.
    ///
    /// The first cycle runs one full interval after spawning; call
    /// `initial_load` beforehand. Dropping the handle also stops the loop.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.config.sync_interval();

        let join = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("[Reconciler] Running every {:?}", period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        let outcome = self.run_cycle().await;
                        debug!("[Reconciler] Cycle finished: {:?}", outcome);
                    }
                }
            }
            info!("[Reconciler] Stopped");
        });

        ReconcilerHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

pub struct ReconcilerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop; a cycle already running finishes first
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.join).await {
            warn!("[Reconciler] Loop ended abnormally: {}", e);
        }
    }
}
