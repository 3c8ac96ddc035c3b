//! Recomputation scheduling for Veil
//!
//! This crate provides:
//! - `RecordTransport`: the seam to the remote record store, plus an
//!   in-memory implementation
//! - `RecordFetcher`: deduplicated batch fetching into the record cache
//! - `ItemLocator`: discovery of item ids and their containers
//! - `HidingScheduler`: token-guarded recomputation passes
//! - `CacheMaintenance`: periodic cache self-healing

pub mod fetch;
pub mod locate;
pub mod maintenance;
pub mod presenter;
pub mod scheduler;
pub mod transport;

// Re-exports
pub use fetch::{FetchSummary, RecordFetcher};
pub use locate::{extract_video_id, CandidateSet, ItemLocator};
pub use maintenance::{CacheMaintenance, MaintenanceReport};
pub use presenter::ClassNames;
pub use scheduler::{ApplyReport, HidingScheduler, PassOutcome};
pub use transport::{FetchedRecords, MemoryTransport, RecordTransport};
