//! In-process copy of every collection.
//!
//! The mirror is the single source the presentation layer observes. Reads are
//! public; writes are crate-private and funnel through the coordinator
//! (optimistic mutations) and the reconciler (fetched replacements). Every
//! write publishes a [`MirrorEvent`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sheetmirror_api::{
    Change, ChangeOrigin, Collection, CollectionState, Fields, MirrorEvent, Record, Result,
    SyncError,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::sync_context::SyncContext;

/// What `replace_id` did with the optimistic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IdReplacement {
    Renamed,
    /// The issued id was already present, so the temp record was dropped
    MergedIntoExisting,
    Missing,
}

/// Result of a reconcile attempt under the write lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReconcileResult<S> {
    Suppressed(S),
    Applied(Vec<Collection>),
}

/// Collections never fetched are absent from the map (`Loading`).
type Collections = HashMap<Collection, Vec<Record>>;

pub struct Mirror {
    collections: RwLock<Collections>,
    events: broadcast::Sender<MirrorEvent>,
}

impl Mirror {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            events: broadcast::channel(event_buffer).0,
        }
    }

    /// Records of a collection in mirror order; empty while still loading
    pub fn get(&self, collection: Collection) -> Vec<Record> {
        self.read()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, collection: Collection, id: &str) -> Option<Record> {
        let collections = self.read();
        let records = collections.get(&collection)?;
        position_of(records, collection, id).map(|index| records[index].clone())
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.read().get(&collection).map_or(0, Vec::len)
    }

    pub fn is_loaded(&self, collection: Collection) -> bool {
        self.read().contains_key(&collection)
    }

    pub fn state(&self, collection: Collection, ctx: &SyncContext) -> CollectionState {
        if !self.is_loaded(collection) {
            CollectionState::Loading
        } else if ctx.pending_for(collection) > 0 {
            CollectionState::StalePendingWrites
        } else {
            CollectionState::Populated
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    /// Event feed as a `Stream`; lagged receivers yield an error item
    pub fn event_stream(&self) -> BroadcastStream<MirrorEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// JSON of a collection as stored in snapshots
    pub(crate) fn serialize(&self, collection: Collection) -> Result<Option<String>> {
        let collections = self.read();
        match collections.get(&collection) {
            Some(records) => Ok(Some(serde_json::to_string(records)?)),
            None => Ok(None),
        }
    }

    /// Replace a collection wholesale
    pub(crate) fn set(&self, collection: Collection, records: Vec<Record>) {
        debug!(
            "[Mirror] Setting {} ({} records)",
            collection,
            records.len()
        );
        self.write().insert(collection, records);
        self.emit(MirrorEvent::CollectionReplaced { collection });
    }

    /// Append a record built from the current content of the collection.
    ///
    /// `build` runs under the write lock; if it fails nothing changes.
    pub(crate) fn insert<T>(
        &self,
        collection: Collection,
        origin: ChangeOrigin,
        build: impl FnOnce(&[Record]) -> Result<(Record, T)>,
    ) -> Result<T> {
        let (record, extra) = {
            let mut collections = self.write();
            let records = collections.entry(collection).or_default();
            let (record, extra) = build(records.as_slice())?;
            records.push(record.clone());
            (record, extra)
        };
        self.emit(MirrorEvent::Changed {
            collection,
            change: Change::Created {
                data: record,
                origin,
            },
        });
        Ok(extra)
    }

    /// Merge fields into an existing record.
    ///
    /// `build` sees the collection and the current record and returns the
    /// fields to merge; it runs under the write lock.
    pub(crate) fn patch<T>(
        &self,
        collection: Collection,
        id: &str,
        origin: ChangeOrigin,
        build: impl FnOnce(&[Record], &Record) -> Result<(Fields, T)>,
    ) -> Result<(Record, T)> {
        let (record, extra) = {
            let mut collections = self.write();
            let records = collections
                .get_mut(&collection)
                .ok_or_else(|| not_found(collection, id))?;
            let index =
                position_of(records, collection, id).ok_or_else(|| not_found(collection, id))?;
            let (fields, extra) = build(records.as_slice(), &records[index])?;
            records[index].merge(&fields);
            (records[index].clone(), extra)
        };
        self.emit(MirrorEvent::Changed {
            collection,
            change: Change::Updated {
                id: id.to_string(),
                data: record.clone(),
                origin,
            },
        });
        Ok((record, extra))
    }

    /// Remove a record, returning its former position.
    ///
    /// `before` runs under the write lock once the record is known to exist.
    pub(crate) fn remove<T>(
        &self,
        collection: Collection,
        id: &str,
        origin: ChangeOrigin,
        before: impl FnOnce(&Record) -> Result<T>,
    ) -> Result<(usize, Record, T)> {
        let (index, record, extra) = {
            let mut collections = self.write();
            let records = collections
                .get_mut(&collection)
                .ok_or_else(|| not_found(collection, id))?;
            let index =
                position_of(records, collection, id).ok_or_else(|| not_found(collection, id))?;
            let extra = before(&records[index])?;
            (index, records.remove(index), extra)
        };
        self.emit(MirrorEvent::Changed {
            collection,
            change: Change::Deleted {
                id: id.to_string(),
                origin,
            },
        });
        Ok((index, record, extra))
    }

    /// Put a removed record back at `index`, clamped to the current length
    pub(crate) fn restore_at(
        &self,
        collection: Collection,
        index: usize,
        record: Record,
        origin: ChangeOrigin,
    ) {
        {
            let mut collections = self.write();
            let records = collections.entry(collection).or_default();
            let index = index.min(records.len());
            records.insert(index, record.clone());
        }
        self.emit(MirrorEvent::Changed {
            collection,
            change: Change::Created {
                data: record,
                origin,
            },
        });
    }

    /// Swap a temp id for the server-issued one.
    ///
    /// The temp id is the exact correlation token returned by `create()`, so
    /// no prefix scan is needed. If the issued id is already in the
    /// collection the temp record is dropped instead.
    pub(crate) fn replace_id(
        &self,
        collection: Collection,
        temp_id: &str,
        real_id: &str,
        origin: ChangeOrigin,
    ) -> IdReplacement {
        let id_field = collection.id_field();
        let (outcome, change) = {
            let mut collections = self.write();
            let Some(records) = collections.get_mut(&collection) else {
                return IdReplacement::Missing;
            };
            let Some(index) = position_of(records, collection, temp_id) else {
                return IdReplacement::Missing;
            };
            if position_of(records, collection, real_id).is_some() {
                records.remove(index);
                (
                    IdReplacement::MergedIntoExisting,
                    Change::Deleted {
                        id: temp_id.to_string(),
                        origin,
                    },
                )
            } else {
                records[index].set(id_field, real_id);
                (
                    IdReplacement::Renamed,
                    Change::Updated {
                        id: temp_id.to_string(),
                        data: records[index].clone(),
                        origin,
                    },
                )
            }
        };
        self.emit(MirrorEvent::Changed { collection, change });
        outcome
    }

    /// Swap in fetched collections whose serialized form differs.
    ///
    /// `suppressed` is re-evaluated while holding the write lock, so a
    /// mutation that began while the fetch was in flight is never
    /// overwritten: the coordinator registers its operation under this same
    /// lock.
    pub(crate) fn reconcile<S>(
        &self,
        fetched: Vec<(Collection, Vec<Record>)>,
        suppressed: impl FnOnce() -> Option<S>,
    ) -> ReconcileResult<S> {
        let changed = {
            let mut collections = self.write();
            if let Some(reason) = suppressed() {
                return ReconcileResult::Suppressed(reason);
            }

            let mut changed = Vec::new();
            for (collection, records) in fetched {
                let differs = match collections.get(&collection) {
                    Some(current) => !same_serialized(current, &records),
                    None => true,
                };
                if differs {
                    collections.insert(collection, records);
                    changed.push(collection);
                }
            }
            changed
        };

        for collection in &changed {
            self.emit(MirrorEvent::CollectionReplaced {
                collection: *collection,
            });
        }
        ReconcileResult::Applied(changed)
    }

    /// Apply the first fetch of each collection.
    ///
    /// `None` records mean the read degraded: the collection is shown empty
    /// only if it has no content yet. Collections for which `pending` holds
    /// are left alone; it is evaluated under the write lock, where the
    /// coordinator registers its operations.
    pub(crate) fn load(
        &self,
        fetched: Vec<(Collection, Option<Vec<Record>>)>,
        pending: impl Fn(Collection) -> bool,
    ) -> Vec<Collection> {
        let loaded = {
            let mut collections = self.write();
            let mut loaded = Vec::new();
            for (collection, records) in fetched {
                if pending(collection) {
                    debug!("[Mirror] Not loading {}: writes in flight", collection);
                    continue;
                }
                match records {
                    Some(records) => {
                        collections.insert(collection, records);
                    }
                    None if !collections.contains_key(&collection) => {
                        collections.insert(collection, Vec::new());
                    }
                    None => continue,
                }
                loaded.push(collection);
            }
            loaded
        };

        for collection in &loaded {
            self.emit(MirrorEvent::CollectionReplaced {
                collection: *collection,
            });
        }
        loaded
    }

    pub(crate) fn request_render(&self, changed: Vec<Collection>) {
        self.emit(MirrorEvent::RenderRequested { changed });
    }

    fn emit(&self, event: MirrorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn position_of(records: &[Record], collection: Collection, id: &str) -> Option<usize> {
    let id_field = collection.id_field();
    let id = id.trim();
    records
        .iter()
        .position(|record| record.id(id_field).as_deref() == Some(id))
}

fn not_found(collection: Collection, id: &str) -> SyncError {
    SyncError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn same_serialized(current: &[Record], fetched: &[Record]) -> bool {
    match (serde_json::to_string(current), serde_json::to_string(fetched)) {
        (Ok(a), Ok(b)) => a == b,
        (a, b) => {
            warn!(
                "[Mirror] Could not serialize for comparison (current ok: {}, fetched ok: {}), treating as changed",
                a.is_ok(),
                b.is_ok()
            );
            false
        }
    }
}
