//! Seam traits for the sheetmirror engine
//!
//! This crate holds the traits the engine is written against:
//! - `RemoteStore`: read a sheet, send a mutation
//! - `SnapshotStore`: best-effort key-per-collection cache
//! - `Clock`: wall-clock millis, swappable for a manual clock in tests

pub mod clock;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use traits::{RemoteStore, SnapshotStore};
