//! Runtime configuration
//!
//! Loaded once at startup (TOML) and handed to each component as a plain
//! read-only value. Every field has a default so a partial file is valid:
//!
//! ```toml
//! [records]
//! capacity = 2000
//!
//! [queries]
//! default_ttl_ms = 1000
//!
//! [scheduler]
//! lazy_processing = true
//! ```

use crate::error::ConfigError;
use crate::selector::SelectorPattern;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub records: RecordCacheConfig,
    pub queries: QueryCacheConfig,
    pub health: HealthConfig,
    pub visibility: VisibilityConfig,
    pub scheduler: SchedulerConfig,
    pub classes: ClassConfig,
}

/// Remote record cache limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordCacheConfig {
    /// Maximum cached records before LRU eviction (default: 1000)
    pub capacity: usize,
}

impl Default for RecordCacheConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Query cache limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// TTL for tree-wide lookups when the caller does not pass one (default: 1000ms)
    pub default_ttl_ms: u64,
    /// Tree-wide entries kept before an expiry sweep (default: 100)
    pub max_tree_entries: usize,
    /// Key patterns invalidated together after structural changes
    pub category_patterns: Vec<String>,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 1000,
            max_tree_entries: 100,
            category_patterns: vec![
                "*video-renderer*".to_string(),
                "*rich-item*".to_string(),
                "*data-video-id*".to_string(),
                "*href*".to_string(),
            ],
        }
    }
}

/// Selector health thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Success rate that must be exceeded to count as healthy (default: 0.7)
    pub healthy_rate: f64,
    /// Queries required before a verdict is trusted (default: 10)
    pub min_samples: u64,
    /// Match counts kept for the rolling average (default: 100)
    pub history_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            healthy_rate: 0.7,
            min_samples: 10,
            history_len: 100,
        }
    }
}

/// Visibility tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Intersection ratio at which a node counts as visible (default: 0.1)
    pub threshold: f64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

/// Recomputation pass behavior and item location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-item hiding enabled (default: true)
    pub individual_mode: bool,
    /// Restrict passes after the first to visible items (default: true)
    pub lazy_processing: bool,
    /// Attribute carrying a video id (default: `data-video-id`)
    pub id_attribute: String,
    /// Selector for links that may embed a video id
    pub link_selector: String,
    /// Container selectors, tried in order
    pub container_selectors: Vec<String>,
    /// Seconds between cache consistency sweeps (default: 60)
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            individual_mode: true,
            lazy_processing: true,
            id_attribute: "data-video-id".to_string(),
            link_selector: r#"a[href*="watch?v="], a[href*="/shorts/"]"#.to_string(),
            container_selectors: vec![
                "ytd-rich-item-renderer".to_string(),
                "ytd-video-renderer, ytd-grid-video-renderer, ytd-compact-video-renderer".to_string(),
                "ytd-reel-item-renderer, ytm-shorts-lockup-view-model".to_string(),
            ],
            maintenance_interval_secs: 60,
        }
    }
}

/// Class names written onto containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub dimmed: String,
    pub hidden: String,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            dimmed: "veil-dimmed".to_string(),
            hidden: "veil-hidden".to_string(),
        }
    }
}

impl VeilConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> String {
        // Every field is a plain scalar, string, or list; serialization cannot fail
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.records.capacity == 0 {
            return Err(invalid("records.capacity", "must be at least 1"));
        }
        if self.queries.default_ttl_ms == 0 {
            return Err(invalid("queries.default_ttl_ms", "must be at least 1ms"));
        }
        if self.queries.max_tree_entries == 0 {
            return Err(invalid("queries.max_tree_entries", "must be at least 1"));
        }
        if let Some(e) = self
            .queries
            .category_patterns
            .iter()
            .find_map(|p| SelectorPattern::new(p.as_str()).err())
        {
            return Err(invalid("queries.category_patterns", &e.to_string()));
        }
        if !(0.0..=1.0).contains(&self.health.healthy_rate) {
            return Err(invalid("health.healthy_rate", "must be within 0.0-1.0"));
        }
        if self.health.history_len == 0 {
            return Err(invalid("health.history_len", "must be at least 1"));
        }
        if !(self.visibility.threshold > 0.0 && self.visibility.threshold <= 1.0) {
            return Err(invalid("visibility.threshold", "must be within (0.0, 1.0]"));
        }
        if self.scheduler.id_attribute.trim().is_empty() {
            return Err(invalid("scheduler.id_attribute", "must not be empty"));
        }
        if self.scheduler.container_selectors.is_empty() {
            return Err(invalid("scheduler.container_selectors", "must list at least one selector"));
        }
        if !(1..=86_400).contains(&self.scheduler.maintenance_interval_secs) {
            return Err(invalid("scheduler.maintenance_interval_secs", "must be within 1-86400"));
        }
        if self.classes.dimmed.is_empty() || self.classes.hidden.is_empty() || self.classes.dimmed == self.classes.hidden {
            return Err(invalid("classes", "dimmed and hidden must be distinct, non-empty names"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = VeilConfig::default();
        config.validate().unwrap();
        assert_eq!(config.records.capacity, 1000);
        assert_eq!(config.queries.default_ttl_ms, 1000);
        assert_eq!(config.health.min_samples, 10);
        assert!(config.scheduler.lazy_processing);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = VeilConfig::from_toml_str(
            "[records]\ncapacity = 2\n\n[scheduler]\nlazy_processing = false\n",
        )
        .unwrap();
        assert_eq!(config.records.capacity, 2);
        assert!(!config.scheduler.lazy_processing);
        assert_eq!(config.classes, ClassConfig::default());
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let err = VeilConfig::from_toml_str("[visibility]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "visibility.threshold", .. }));

        let err = VeilConfig::from_toml_str("[records]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "records.capacity", .. }));

        let err = VeilConfig::from_toml_str("[classes]\ndimmed = \"x\"\nhidden = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "classes", .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = VeilConfig::from_toml_str("[records\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_round_trip_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("veil.toml");

        let mut config = VeilConfig::default();
        config.records.capacity = 64;
        fs::write(&path, config.to_toml_string()).unwrap();

        let loaded = VeilConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let missing = VeilConfig::load(&temp_dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
