pub mod snapshot_store;

pub use snapshot_store::{load_records, FileSnapshotStore, MemorySnapshotStore};
