//! Traits the engine talks to its collaborators through

use async_trait::async_trait;
use sheetmirror_api::{MutationRequest, MutationResponse, Result, Value};

/// Transport to the external tabular store.
///
/// Implementations perform exactly one attempt per call; retry, backoff and
/// the read timeout are layered on top by the gateway.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Name used in log lines (e.g. "appscript", "fake")
    fn store_name(&self) -> &str;

    /// Read one sheet: header row followed by data rows.
    ///
    /// `bust_cache` asks the transport to defeat any intermediate caching.
    async fn read_sheet(&self, sheet_name: &str, bust_cache: bool) -> Result<Vec<Vec<Value>>>;

    /// Send one write. A `status: "error"` reply is returned as-is; the caller
    /// decides how to surface it.
    async fn send_mutation(&self, request: &MutationRequest) -> Result<MutationResponse>;
}

/// Key-per-collection string cache used to warm the mirror after a restart.
///
/// Never authoritative: the next successful fetch replaces whatever was
/// restored from here.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, key: &str, payload: String) -> Result<()>;

    /// Returns None if nothing was saved under `key`
    async fn load(&self, key: &str) -> Result<Option<String>>;
}
