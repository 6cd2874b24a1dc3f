//! Snapshot stores for warm starts
//!
//! Snapshots are a best-effort cache keyed per collection. Failures are
//! logged by the callers and never abort a sync step.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

use sheetmirror_api::{Collection, Record, Result, SyncError};
use sheetmirror_core::SnapshotStore;

use crate::mirror::Mirror;

/// In-memory snapshot store
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, key: &str, payload: String) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), payload);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

/// One `<key>.json` file per collection under a directory
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SyncError::Storage {
                message: format!("Invalid snapshot key '{}'", key),
            });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> SyncError {
    SyncError::Storage {
        message: format!("Failed to {} {}: {}", action, path.display(), e),
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, key: &str, payload: String) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create", &self.dir, e))?;

        // Write then rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload.as_bytes())
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("rename", &tmp, e))?;

        debug!("[FileSnapshotStore] Saved {}", path.display());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", &path, e)),
        }
    }
}

/// Decode the snapshot of one collection, if one was saved
pub async fn load_records(
    store: &dyn SnapshotStore,
    collection: Collection,
) -> Result<Option<Vec<Record>>> {
    match store.load(collection.key()).await? {
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Best-effort save of a snapshotted collection; failures are only logged
pub(crate) async fn save_collection(
    store: &dyn SnapshotStore,
    mirror: &Mirror,
    collection: Collection,
) {
    if !collection.schema().snapshotted {
        return;
    }
    let payload = match mirror.serialize(collection) {
        Ok(Some(payload)) => payload,
        Ok(None) => return,
        Err(e) => {
            warn!("[Snapshot] Could not serialize {}: {}", collection, e);
            return;
        }
    };
    if let Err(e) = store.save(collection.key(), payload).await {
        warn!("[Snapshot] Could not save {}: {}", collection, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_and_misses_cleanly() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));

        assert_eq!(store.load("clients").await?, None);
        store.save("clients", "[]".to_string()).await?;
        assert_eq!(store.load("clients").await?.as_deref(), Some("[]"));
        assert!(dir.path().join("snapshots/clients.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let store = FileSnapshotStore::new("/tmp/unused");
        let err = store.save("../etc", String::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage { .. }));
    }

    #[tokio::test]
    async fn records_decode_from_a_snapshot() -> anyhow::Result<()> {
        let store = MemorySnapshotStore::new();
        store
            .save("brands", r#"[{"ID_Marca":"1","Nombre_Marca":"NOVA"}]"#.to_string())
            .await?;

        let records = load_records(&store, Collection::Brands).await?.unwrap();
        assert_eq!(records[0].id("ID_Marca").as_deref(), Some("1"));
        assert_eq!(load_records(&store, Collection::Clients).await?, None);
        Ok(())
    }
}
