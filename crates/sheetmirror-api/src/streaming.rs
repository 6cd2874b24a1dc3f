use serde::{Deserialize, Serialize};

use crate::{Collection, Record};

/// Origin of a change event (local vs. remote).
///
/// Lets a presentation layer tell an optimistic edit apart from data that
/// arrived with a remote fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Optimistic write made by this process
    Local {
        /// Correlation token of the mutation that produced the change
        correlation: Option<String>,
    },
    /// Remote confirmation or a reconcile fetch
    Remote,
}

impl ChangeOrigin {
    pub fn local(correlation: impl Into<String>) -> Self {
        Self::Local {
            correlation: Some(correlation.into()),
        }
    }

    pub fn correlation(&self) -> Option<&str> {
        match self {
            Self::Local { correlation } => correlation.as_deref(),
            Self::Remote => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// Change notification for a single record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Change<T> {
    /// Record was inserted (optimistic create, or a delete rolled back)
    Created { data: T, origin: ChangeOrigin },
    /// Record fields or its identifier changed; `id` is the id it had before
    Updated {
        id: String,
        data: T,
        origin: ChangeOrigin,
    },
    /// Record was removed
    Deleted { id: String, origin: ChangeOrigin },
}

impl<T> Change<T> {
    pub fn origin(&self) -> &ChangeOrigin {
        match self {
            Change::Created { origin, .. }
            | Change::Updated { origin, .. }
            | Change::Deleted { origin, .. } => origin,
        }
    }
}

/// Event published by the mirror to its observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MirrorEvent {
    Changed {
        collection: Collection,
        change: Change<Record>,
    },
    /// Whole collection swapped for fetched content
    CollectionReplaced { collection: Collection },
    /// The active view should be redrawn
    RenderRequested { changed: Vec<Collection> },
}

/// Non-blocking, user-facing notice. Nothing in the sync engine is fatal, so
/// every failure ends up as one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Notification {
    /// A write is on its way to the remote store
    Syncing {
        collection: Collection,
        label: String,
    },
    /// No write is in flight any more
    SyncCleared,
    Success(String),
    Warning(String),
    Error(String),
}

impl Notification {
    pub fn is_failure(&self) -> bool {
        matches!(self, Notification::Warning(_) | Notification::Error(_))
    }
}
