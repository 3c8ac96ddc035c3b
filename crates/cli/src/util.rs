//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use std::path::Path;
use veil_core::VeilConfig;

/// Load a config file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<VeilConfig> {
    match path {
        Some(path) => VeilConfig::load(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(VeilConfig::default()),
    }
}

/// Format a ratio as a percentage
pub fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
