//! Optimistic local mirror of a remote spreadsheet store
//!
//! - `gateway`: retrying reads and write bookkeeping over a `RemoteStore`
//! - `mirror`: the in-process copy the presentation layer observes
//! - `coordinator`: optimistic create/update/delete
//! - `reconciler`: periodic refetch, suppressed while writes are settling

pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod mirror;
pub mod notify;
pub mod reconciler;
pub mod storage;
pub mod sync_context;
pub mod testing;
mod validation;

use std::sync::Arc;

use sheetmirror_core::{Clock, RemoteStore, SnapshotStore};

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{Coordinator, MutationOutcome, PendingMutation};
pub use gateway::{Gateway, SheetRead};
pub use mirror::Mirror;
pub use notify::Notifier;
pub use reconciler::{CycleOutcome, Reconciler, ReconcilerHandle};
pub use sync_context::{OperationGuard, SkipReason, SyncContext};

/// All engine components wired around one remote store
pub struct SyncEngine {
    mirror: Arc<Mirror>,
    ctx: Arc<SyncContext>,
    coordinator: Coordinator,
    reconciler: Arc<Reconciler>,
    notifier: Notifier,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let ctx = Arc::new(SyncContext::new(clock));
        let mirror = Arc::new(Mirror::new(config.event_buffer));
        let notifier = Notifier::new(config.event_buffer);
        let gateway = Arc::new(Gateway::new(remote, Arc::clone(&ctx), config.clone()));

        let coordinator = Coordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&mirror),
            Arc::clone(&ctx),
            Arc::clone(&snapshots),
            notifier.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(
            gateway,
            Arc::clone(&mirror),
            Arc::clone(&ctx),
            snapshots,
            config,
        ));

        Ok(Self {
            mirror,
            ctx,
            coordinator,
            reconciler,
            notifier,
        })
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Warm start from snapshots, fetch everything, then start the
    /// periodic loop
    pub async fn start(&self) -> ReconcilerHandle {
        self.reconciler.warm_start().await;
        self.reconciler.initial_load().await;
        Arc::clone(&self.reconciler).spawn()
    }
}
