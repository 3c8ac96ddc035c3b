//! Error types shared across Veil crates

use std::path::PathBuf;
use thiserror::Error;

/// A selector string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected character {found:?} at offset {offset} in selector {selector:?}")]
    Unexpected {
        selector: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated {what} in selector {selector:?}")]
    Unterminated { selector: String, what: &'static str },
    #[error("dangling combinator in selector {0:?}")]
    DanglingCombinator(String),
    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Configuration could not be loaded or is out of range
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The remote record transport failed
///
/// Cloneable so one failure can be handed to every waiter of a shared fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("remote rejected request: {0}")]
    Rejected(String),
}
