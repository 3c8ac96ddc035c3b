//! State and query caches for Veil
//!
//! This crate provides:
//! - `RecordCache`: bounded LRU store of remote video state records with
//!   last-writer-wins merging and a pending-fetch registry
//! - `QueryCache`: node-scoped and tree-wide caches of structural lookups
//! - `SelectorHealthMonitor`: success tracking for lookup strategies and
//!   the selector-chain fallback pattern built on it

pub mod health;
pub mod query_cache;
pub mod record_cache;

// Re-exports
pub use health::{ChainMatch, SelectorChain, SelectorHealth, SelectorHealthMonitor};
pub use query_cache::{InvalidationTarget, QueryCache, QueryStats};
pub use record_cache::{ConsistencyReport, FetchFuture, PendingFetch, RecordCache, RepairAction};
