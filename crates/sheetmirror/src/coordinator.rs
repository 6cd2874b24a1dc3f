//! Optimistic Mutation Coordinator
//!
//! Every write follows the same path:
//! 1. validate against the mirror (no side effects on failure)
//! 2. register the operation with the sync context and mutate the mirror,
//!    both under the mirror write lock
//! 3. spawn a tracked task that snapshots, sends the write and settles the
//!    local state with the reply
//!
//! On failure a delete is rolled back at its original position; creates and
//! updates keep their optimistic state and raise a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sheetmirror_api::{
    ChangeOrigin, Collection, Fields, MutationAction, MutationRequest, Record, Result, SyncError,
    TempId, Value,
};
use sheetmirror_core::{Clock, SnapshotStore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::mirror::{IdReplacement, Mirror};
use crate::notify::Notifier;
use crate::storage::snapshot_store::save_collection;
use crate::sync_context::{OperationGuard, SyncContext};
use crate::validation;

/// Alert status set by `resolve_alert`
pub const ALERT_RESOLVED: &str = "Resuelta";

/// How a mutation settled once the remote store answered
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The store accepted the write. `id` is the server-issued id of a create.
    Confirmed { id: Option<String> },
    /// The write failed and the local change was undone
    RolledBack { error: SyncError },
    /// The write failed; the optimistic state stays in the mirror
    KeptLocal { error: SyncError },
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed { .. })
    }
}

/// Handle to a write that was applied locally and is still settling remotely
#[derive(Debug)]
pub struct PendingMutation {
    token: String,
    collection: Collection,
    action: MutationAction,
    handle: JoinHandle<MutationOutcome>,
}

impl PendingMutation {
    /// Correlation token; for creates this is the temp id of the new record
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn action(&self) -> MutationAction {
        self.action
    }

    /// Wait for the remote reply to be applied
    pub async fn outcome(self) -> MutationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => MutationOutcome::KeptLocal {
                error: SyncError::Internal {
                    message: format!("mutation task failed: {}", e),
                },
            },
        }
    }
}

/// State shared with the spawned settle tasks
struct Shared {
    gateway: Arc<Gateway>,
    mirror: Arc<Mirror>,
    snapshots: Arc<dyn SnapshotStore>,
    notifier: Notifier,
    ctx: Arc<SyncContext>,
}

pub struct Coordinator {
    shared: Arc<Shared>,
    sequence: AtomicU64,
}

impl Coordinator {
    pub fn new(
        gateway: Arc<Gateway>,
        mirror: Arc<Mirror>,
        ctx: Arc<SyncContext>,
        snapshots: Arc<dyn SnapshotStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                gateway,
                mirror,
                snapshots,
                notifier,
                ctx,
            }),
            sequence: AtomicU64::new(0),
        }
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.shared.ctx.clock()
    }

    fn timestamp(&self) -> Value {
        Value::String(self.clock().now().to_rfc3339())
    }

    /// Insert a record under a temp id and send it to the store.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(name = "coordinator.create", skip(self, fields))]
    pub fn create(&self, collection: Collection, fields: Fields) -> Result<PendingMutation> {
        let schema = validation::writable_schema(collection)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let temp_id = TempId::generate(self.clock().now_millis(), sequence);
        let token = temp_id.to_string();
        let now = self.timestamp();
        let ctx = &self.shared.ctx;

        let (data, guard) = self.shared.mirror.insert(
            collection,
            ChangeOrigin::local(token.clone()),
            |records| {
                let data = validation::prepare_create(collection, fields, records)?;
                let mut record = Record::from_fields(data.clone());
                record.set(schema.id_field, token.as_str());
                for stamp in [schema.created_at_field, schema.updated_at_field]
                    .into_iter()
                    .flatten()
                {
                    record.set(stamp, now.clone());
                }
                Ok((record, (data, ctx.begin_operation(collection))))
            },
        )?;

        info!("[Coordinator] Created {} {} optimistically", collection, token);
        let request = MutationRequest::add(collection.sheet_name(), data);
        Ok(self.dispatch(collection, token, request, guard, Settle::Create))
    }

    /// Merge fields into an existing record and send the patch
    #[tracing::instrument(name = "coordinator.update", skip(self, fields))]
    pub fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<PendingMutation> {
        let schema = validation::writable_schema(collection)?;
        reject_unsettled(id)?;
        let now = self.timestamp();
        let ctx = &self.shared.ctx;
        let token = format!("update_{}_{}", collection, id.trim());

        let (_, (data, guard)) = self.shared.mirror.patch(
            collection,
            id,
            ChangeOrigin::local(token.clone()),
            |records, current| {
                let data = validation::prepare_update(collection, fields, current, records)?;
                let mut local = data.clone();
                if let Some(stamp) = schema.updated_at_field {
                    local.insert(stamp.to_string(), now);
                }
                Ok((local, (data, ctx.begin_operation(collection))))
            },
        )?;

        info!("[Coordinator] Updated {} {} optimistically", collection, id);
        let request = MutationRequest::update(collection.sheet_name(), id.trim(), data);
        Ok(self.dispatch(collection, token, request, guard, Settle::Update))
    }

    /// Remove a record and send the delete; restored in place if it fails
    #[tracing::instrument(name = "coordinator.delete", skip(self))]
    pub fn delete(&self, collection: Collection, id: &str) -> Result<PendingMutation> {
        validation::writable_schema(collection)?;
        reject_unsettled(id)?;
        let ctx = &self.shared.ctx;
        let token = format!("delete_{}_{}", collection, id.trim());

        let (index, record, guard) = self.shared.mirror.remove(
            collection,
            id,
            ChangeOrigin::local(token.clone()),
            |_| Ok(ctx.begin_operation(collection)),
        )?;

        info!(
            "[Coordinator] Deleted {} {} optimistically (was at {})",
            collection, id, index
        );
        let request = MutationRequest::delete(collection.sheet_name(), id.trim());
        Ok(self.dispatch(
            collection,
            token,
            request,
            guard,
            Settle::Delete { index, record },
        ))
    }

    /// Mark an alert as resolved now
    pub fn resolve_alert(&self, id: &str) -> Result<PendingMutation> {
        let mut fields = Fields::new();
        fields.insert("Estado".to_string(), Value::from(ALERT_RESOLVED));
        fields.insert("Fecha_Resolucion".to_string(), self.timestamp());
        self.update(Collection::Alerts, id, fields)
    }

    fn dispatch(
        &self,
        collection: Collection,
        token: String,
        request: MutationRequest,
        guard: OperationGuard,
        settle: Settle,
    ) -> PendingMutation {
        let action = request.action;
        self.shared
            .notifier
            .syncing(collection, format!("{} {}", action_label(action), collection));

        let shared = Arc::clone(&self.shared);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = shared
                .settle(collection, &task_token, request, settle)
                .await;
            drop(guard);
            if !shared.ctx.is_operating() {
                shared.notifier.sync_cleared();
            }
            outcome
        });

        PendingMutation {
            token,
            collection,
            action,
            handle,
        }
    }
}

/// What to do with the local state once the reply arrives
enum Settle {
    Create,
    Update,
    Delete { index: usize, record: Record },
}

impl Shared {
    async fn settle(
        &self,
        collection: Collection,
        token: &str,
        request: MutationRequest,
        settle: Settle,
    ) -> MutationOutcome {
        save_collection(self.snapshots.as_ref(), &self.mirror, collection).await;

        let action = action_label(request.action);
        let result = self.gateway.send_mutation(request).await;

        match (result, settle) {
            (Ok(response), Settle::Create) => {
                let id = response.issued_id();
                match &id {
                    Some(real_id) => {
                        let replaced = self.mirror.replace_id(
                            collection,
                            token,
                            real_id,
                            ChangeOrigin::Remote,
                        );
                        match replaced {
                            IdReplacement::Renamed => {
                                debug!("[Coordinator] {} {} is now {}", collection, token, real_id)
                            }
                            IdReplacement::MergedIntoExisting => info!(
                                "[Coordinator] {} {} already present; dropped {}",
                                collection, real_id, token
                            ),
                            IdReplacement::Missing => warn!(
                                "[Coordinator] {} {} vanished before id {} arrived",
                                collection, token, real_id
                            ),
                        }
                        save_collection(self.snapshots.as_ref(), &self.mirror, collection).await;
                    }
                    None => warn!(
                        "[Coordinator] Store accepted {} {} without issuing an id",
                        collection, token
                    ),
                }
                self.notifier
                    .success(format!("{} {} saved", collection, action));
                MutationOutcome::Confirmed { id }
            }
            (Ok(_), Settle::Update | Settle::Delete { .. }) => {
                self.notifier
                    .success(format!("{} {} saved", collection, action));
                MutationOutcome::Confirmed { id: None }
            }
            (Err(error), Settle::Delete { index, record }) => {
                self.mirror
                    .restore_at(collection, index, record, ChangeOrigin::local(token));
                save_collection(self.snapshots.as_ref(), &self.mirror, collection).await;
                self.report_failure(collection, action, &error, true);
                MutationOutcome::RolledBack { error }
            }
            (Err(error), Settle::Create | Settle::Update) => {
                self.report_failure(collection, action, &error, false);
                MutationOutcome::KeptLocal { error }
            }
        }
    }

    fn report_failure(&self, collection: Collection, action: &str, error: &SyncError, rolled_back: bool) {
        let local = if rolled_back {
            "the change was undone"
        } else {
            "the local change is kept until the next sync"
        };
        let message = format!("{} {} failed: {}; {}", collection, action, error, local);
        match error {
            SyncError::Remote { .. } => self.notifier.error(message),
            _ => self.notifier.warning(message),
        }
    }
}

fn action_label(action: MutationAction) -> &'static str {
    match action {
        MutationAction::Add => "create",
        MutationAction::Update => "update",
        MutationAction::Delete => "delete",
    }
}

/// A record whose create has not been confirmed has no server id to target
fn reject_unsettled(id: &str) -> Result<()> {
    if TempId::is_temp(id.trim()) {
        return Err(SyncError::validation(format!(
            "Record {} is still being created",
            id.trim()
        )));
    }
    Ok(())
}
