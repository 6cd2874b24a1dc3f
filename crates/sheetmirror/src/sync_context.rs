//! Shared suppression state between the mutation coordinator and the
//! reconciler.
//!
//! The "operating" flag is reference counted: every in-flight write holds an
//! [`OperationGuard`], and the reconciler only runs once all guards are gone
//! and the post-write cooldown has elapsed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sheetmirror_api::Collection;
use sheetmirror_core::Clock;
use tokio::sync::watch;
use tracing::debug;

const NEVER_WRITTEN: i64 = i64::MIN;

/// Why a reconcile cycle did not touch the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A write was recorded less than the cooldown ago
    Cooldown { remaining_ms: i64 },
    /// Writes or open edits are still in flight
    Operating { in_flight: usize },
}

pub struct SyncContext {
    clock: Arc<dyn Clock>,
    in_flight: watch::Sender<usize>,
    per_collection: Mutex<HashMap<Collection, usize>>,
    last_write_ms: AtomicI64,
}

impl SyncContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            clock,
            in_flight,
            per_collection: Mutex::new(HashMap::new()),
            last_write_ms: AtomicI64::new(NEVER_WRITTEN),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Track one write against `collection` until the guard is dropped
    pub fn begin_operation(self: &Arc<Self>, collection: Collection) -> OperationGuard {
        *self
            .per_collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection)
            .or_insert(0) += 1;
        self.increment();
        OperationGuard {
            ctx: Arc::clone(self),
            collection: Some(collection),
        }
    }

    /// Suppress reconciliation while an edit is open in the presentation layer
    pub fn hold(self: &Arc<Self>) -> OperationGuard {
        self.increment();
        OperationGuard {
            ctx: Arc::clone(self),
            collection: None,
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn is_operating(&self) -> bool {
        self.in_flight() > 0
    }

    pub fn pending_for(&self, collection: Collection) -> usize {
        self.per_collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Resolves once no operation is tracked
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    pub fn record_write(&self) {
        self.last_write_ms
            .store(self.clock.now_millis(), Ordering::SeqCst);
    }

    pub fn last_write_ms(&self) -> Option<i64> {
        match self.last_write_ms.load(Ordering::SeqCst) {
            NEVER_WRITTEN => None,
            millis => Some(millis),
        }
    }

    /// Milliseconds of cooldown still to run, if any
    fn cooldown_remaining(&self, cooldown: Duration) -> Option<i64> {
        let last = self.last_write_ms()?;
        let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
        let elapsed = self.clock.now_millis().saturating_sub(last);
        (elapsed < cooldown_ms).then(|| cooldown_ms - elapsed)
    }

    /// Reason the reconciler must not touch the mirror right now; cooldown
    /// is checked first.
    pub fn suppression(&self, cooldown: Duration) -> Option<SkipReason> {
        if let Some(remaining_ms) = self.cooldown_remaining(cooldown) {
            return Some(SkipReason::Cooldown { remaining_ms });
        }
        match self.in_flight() {
            0 => None,
            in_flight => Some(SkipReason::Operating { in_flight }),
        }
    }

    fn increment(&self) {
        self.in_flight.send_modify(|count| *count += 1);
    }

    fn finish(&self, collection: Option<Collection>) {
        if let Some(collection) = collection {
            let mut per_collection = self
                .per_collection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = per_collection.get_mut(&collection) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_collection.remove(&collection);
                }
            }
        }
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
        if self.in_flight() == 0 {
            debug!("[SyncContext] All operations finished");
        }
    }
}

/// Keeps the reconciler suppressed while alive
#[must_use = "dropping the guard immediately ends the operation"]
pub struct OperationGuard {
    ctx: Arc<SyncContext>,
    collection: Option<Collection>,
}

impl OperationGuard {
    pub fn collection(&self) -> Option<Collection> {
        self.collection
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.ctx.finish(self.collection);
    }
}
