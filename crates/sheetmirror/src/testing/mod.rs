//! Test doubles for the sync engine
//!
//! `FakeRemoteStore` behaves like the script endpoint: it keeps one table per
//! sheet, applies writes to it, and issues ids on `add`. Tests script
//! failures, slow reads and held writes on top of that.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use sheetmirror_api::{
    Collection, MutationAction, MutationRequest, MutationResponse, Record, Result, SyncError,
    Value,
};
use sheetmirror_core::RemoteStore;

enum MutationFailure {
    /// Reply with `status: "error"`
    Reject(String),
    /// Fail at the transport level
    Error(SyncError),
}

struct FakeState {
    sheets: HashMap<Collection, Vec<Record>>,
    read_failures: HashMap<Collection, (usize, SyncError)>,
    read_counts: HashMap<Collection, usize>,
    read_delay: Option<Duration>,
    mutation_failures: VecDeque<MutationFailure>,
    mutations: Vec<MutationRequest>,
    forced_ids: VecDeque<String>,
    next_id: u64,
}

pub struct FakeRemoteStore {
    state: Mutex<FakeState>,
    held: watch::Sender<bool>,
}

impl Default for FakeRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                sheets: HashMap::new(),
                read_failures: HashMap::new(),
                read_counts: HashMap::new(),
                read_delay: None,
                mutation_failures: VecDeque::new(),
                mutations: Vec::new(),
                forced_ids: VecDeque::new(),
                next_id: 1,
            }),
            held: watch::channel(false).0,
        }
    }

    /// Ids issued on `add` count up from `first`
    pub fn starting_ids_at(self, first: u64) -> Self {
        self.state().next_id = first;
        self
    }

    /// Replace the remote content of a collection
    pub fn seed(&self, collection: Collection, records: Vec<Record>) {
        self.state().sheets.insert(collection, records);
    }

    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.state()
            .sheets
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// The next `times` reads of `collection` fail with `error`
    pub fn fail_reads(&self, collection: Collection, times: usize, error: SyncError) {
        self.state()
            .read_failures
            .insert(collection, (times, error));
    }

    /// Every read waits this long before answering
    pub fn delay_reads(&self, delay: Duration) {
        self.state().read_delay = Some(delay);
    }

    pub fn read_count(&self, collection: Collection) -> usize {
        self.state()
            .read_counts
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Next write is answered with `status: "error"`
    pub fn reject_next_mutation(&self, message: impl Into<String>) {
        self.state()
            .mutation_failures
            .push_back(MutationFailure::Reject(message.into()));
    }

    /// Next write fails before reaching the sheet
    pub fn fail_next_mutation(&self, error: SyncError) {
        self.state()
            .mutation_failures
            .push_back(MutationFailure::Error(error));
    }

    /// Next `add` is answered with this id instead of a fresh one
    pub fn issue_id(&self, id: impl Into<String>) {
        self.state().forced_ids.push_back(id.into());
    }

    /// Writes wait until `release_mutations` is called
    pub fn hold_mutations(&self) {
        self.held.send_replace(true);
    }

    pub fn release_mutations(&self) {
        self.held.send_replace(false);
    }

    /// Writes that reached the store, in arrival order
    pub fn mutations(&self) -> Vec<MutationRequest> {
        self.state().mutations.clone()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rows_for(records: &[Record], collection: Collection) -> Vec<Vec<Value>> {
        let id_field = collection.id_field();
        let mut header = vec![id_field.to_string()];
        let mut rest: Vec<String> = records
            .iter()
            .flat_map(|r| r.fields().keys().cloned())
            .filter(|name| name != id_field)
            .collect();
        rest.sort();
        rest.dedup();
        header.extend(rest);

        let mut rows = vec![header.iter().map(|h| Value::from(h.as_str())).collect()];
        rows.extend(records.iter().map(|record| {
            header
                .iter()
                .map(|h| record.get(h).cloned().unwrap_or(Value::String(String::new())))
                .collect()
        }));
        rows
    }

    fn apply(state: &mut FakeState, request: &MutationRequest) -> MutationResponse {
        let Some(collection) = Collection::from_sheet_name(&request.sheet_name) else {
            return MutationResponse::error(format!("Sheet not found: {}", request.sheet_name));
        };
        let id_field = collection.id_field();
        let row_id = request.row_id.as_deref().unwrap_or_default().trim().to_string();

        match request.action {
            MutationAction::Add => {
                let id = match state.forced_ids.pop_front() {
                    Some(id) => id,
                    None => {
                        let id = state.next_id;
                        state.next_id += 1;
                        id.to_string()
                    }
                };
                let mut record = Record::from_fields(request.data.clone().unwrap_or_default());
                record.set(id_field, id.as_str());
                state.sheets.entry(collection).or_default().push(record);
                MutationResponse::success(Some(&id))
            }
            MutationAction::Update => {
                let records = state.sheets.entry(collection).or_default();
                match records
                    .iter_mut()
                    .find(|r| r.id(id_field).as_deref() == Some(row_id.as_str()))
                {
                    Some(record) => {
                        if let Some(data) = &request.data {
                            record.merge(data);
                        }
                        MutationResponse::success(None)
                    }
                    None => MutationResponse::error(format!("Row not found: {}", row_id)),
                }
            }
            MutationAction::Delete => {
                let records = state.sheets.entry(collection).or_default();
                match records
                    .iter()
                    .position(|r| r.id(id_field).as_deref() == Some(row_id.as_str()))
                {
                    Some(index) => {
                        records.remove(index);
                        MutationResponse::success(None)
                    }
                    None => MutationResponse::error(format!("Row not found: {}", row_id)),
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    fn store_name(&self) -> &str {
        "fake"
    }

    async fn read_sheet(&self, sheet_name: &str, _bust_cache: bool) -> Result<Vec<Vec<Value>>> {
        let collection = Collection::from_sheet_name(sheet_name)
            .ok_or_else(|| SyncError::remote(format!("Sheet not found: {}", sheet_name)))?;

        let delay = {
            let mut state = self.state();
            *state.read_counts.entry(collection).or_insert(0) += 1;
            state.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some((remaining, error)) = state.read_failures.get_mut(&collection) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        let records = state.sheets.get(&collection).cloned().unwrap_or_default();
        Ok(Self::rows_for(&records, collection))
    }

    async fn send_mutation(&self, request: &MutationRequest) -> Result<MutationResponse> {
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        let mut state = self.state();
        state.mutations.push(request.clone());
        match state.mutation_failures.pop_front() {
            Some(MutationFailure::Reject(message)) => Ok(MutationResponse::error(message)),
            Some(MutationFailure::Error(error)) => Err(error),
            None => Ok(Self::apply(&mut state, request)),
        }
    }
}
