//! Tree observation for Veil
//!
//! This crate provides:
//! - `VisibilityTracker`: visible-item set driven by intersection batches
//! - `MutationRouter`: turns drained tree mutation batches into query cache
//!   invalidation and pass triggers

pub mod mutations;
pub mod visibility;

// Re-exports
pub use mutations::{MutationRouter, RouteOutcome};
pub use visibility::{IntersectionEntry, Subscription, VisibilityCallback, VisibilityChange, VisibilityTracker};
