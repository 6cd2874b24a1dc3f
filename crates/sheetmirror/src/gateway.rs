//! Remote Store Gateway
//!
//! Wraps a [`RemoteStore`] transport with the read policy (per-attempt
//! timeout, linear backoff, degrade to empty) and the write bookkeeping
//! (last-write timestamps that drive the reconciler cooldown).

use std::sync::Arc;

use futures::future::join_all;
use sheetmirror_api::{
    rows_to_records, Collection, MutationRequest, MutationResponse, Record, Result, SyncError,
};
use sheetmirror_core::RemoteStore;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::sync_context::SyncContext;

/// Outcome of reading one sheet.
///
/// `complete == false` means the read degraded to empty: the records are
/// unknown, not confirmed empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRead {
    pub collection: Collection,
    pub records: Vec<Record>,
    pub complete: bool,
}

impl SheetRead {
    fn degraded(collection: Collection) -> Self {
        Self {
            collection,
            records: Vec::new(),
            complete: false,
        }
    }
}

pub struct Gateway {
    remote: Arc<dyn RemoteStore>,
    ctx: Arc<SyncContext>,
    config: SyncConfig,
}

impl Gateway {
    pub fn new(remote: Arc<dyn RemoteStore>, ctx: Arc<SyncContext>, config: SyncConfig) -> Self {
        Self {
            remote,
            ctx,
            config,
        }
    }

    pub fn store_name(&self) -> &str {
        self.remote.store_name()
    }

    /// Read one collection; never fails.
    #[tracing::instrument(name = "gateway.read_sheet", skip(self), fields(store = %self.remote.store_name()))]
    pub async fn read_sheet(&self, collection: Collection) -> SheetRead {
        let sheet = collection.sheet_name();
        let attempts = self.config.read_retries.max(1);

        for attempt in 1..=attempts {
            let result =
                tokio::time::timeout(self.config.read_timeout(), self.remote.read_sheet(sheet, true))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SyncError::Timeout {
                            message: format!(
                                "reading {} took longer than {}ms",
                                sheet, self.config.read_timeout_ms
                            ),
                        })
                    });

            match result {
                Ok(rows) => {
                    let records = rows_to_records(&rows);
                    debug!(
                        "[Gateway] Read {} records from {} (attempt {})",
                        records.len(),
                        sheet,
                        attempt
                    );
                    return SheetRead {
                        collection,
                        records,
                        complete: true,
                    };
                }
                Err(e) if !e.is_transient() => {
                    warn!(
                        "[Gateway] Reading {} failed without retry: {}; degrading to empty",
                        sheet, e
                    );
                    return SheetRead::degraded(collection);
                }
                Err(e) => {
                    warn!(
                        "[Gateway] Reading {} failed (attempt {}/{}): {}",
                        sheet, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.read_backoff(attempt)).await;
                    }
                }
            }
        }

        warn!(
            "[Gateway] Giving up on {} after {} attempts; degrading to empty",
            sheet, attempts
        );
        SheetRead::degraded(collection)
    }

    /// Read every known collection concurrently, in `Collection::ALL` order
    pub async fn read_all(&self) -> Vec<SheetRead> {
        let reads = join_all(Collection::ALL.map(|c| self.read_sheet(c))).await;
        let incomplete = reads.iter().filter(|r| !r.complete).count();
        info!(
            "[Gateway] Read {} collections from {} ({} incomplete)",
            reads.len(),
            self.remote.store_name(),
            incomplete
        );
        reads
    }

    /// Send one write. Not retried and not timed out here.
    ///
    /// The last-write timestamp is recorded before sending and again on
    /// success, so the cooldown spans the whole round trip.
    #[tracing::instrument(
        name = "gateway.send_mutation",
        skip(self, request),
        fields(action = request.action.as_str(), sheet = %request.sheet_name)
    )]
    pub async fn send_mutation(&self, request: MutationRequest) -> Result<MutationResponse> {
        let request = if request.user.is_some() {
            request
        } else {
            request.with_user(self.config.user.clone())
        };

        self.ctx.record_write();
        let response = self
            .remote
            .send_mutation(&request)
            .await
            .and_then(MutationResponse::into_result)
            .map_err(|e| {
                warn!(
                    "[Gateway] {} on {} failed: {}",
                    request.action.as_str(),
                    request.sheet_name,
                    e
                );
                e
            })?;
        self.ctx.record_write();

        debug!(
            "[Gateway] {} on {} succeeded",
            request.action.as_str(),
            request.sheet_name
        );
        Ok(response)
    }
}
