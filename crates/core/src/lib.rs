//! Core types for Veil
//!
//! This crate provides:
//! - Video state records (the remote-owned per-item visibility state)
//! - An arena-backed node tree with a mutation log
//! - A small selector engine used for structural lookups
//! - Clock abstraction, configuration, and error types

pub mod clock;
pub mod config;
pub mod error;
pub mod record;
pub mod selector;
pub mod tree;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VeilConfig;
pub use error::{ConfigError, SelectorError, TransportError};
pub use record::{VideoStateRecord, VisualState};
pub use selector::{Selector, SelectorPattern};
pub use tree::{Mutation, NodeId, NodeTree, SharedTree};
