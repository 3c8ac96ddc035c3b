//! Selector health monitoring and fallback chains
//!
//! The feed's markup drifts over time. Each logical lookup ("video
//! container", "thumbnail link") is expressed as a [`SelectorChain`] of
//! alternatives; every resolution is recorded against the chain's key so
//! degradation shows up as a falling success rate instead of silently
//! empty results.

use crate::query_cache::QueryCache;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use veil_core::config::HealthConfig;
use veil_core::{Clock, NodeId, NodeTree};

#[derive(Debug, Default, Clone)]
struct HealthCounters {
    queries: u64,
    successes: u64,
    failures: u64,
    fallback_hits: u64,
    last_success_ms: Option<u64>,
    last_failure_ms: Option<u64>,
    last_selector: Option<String>,
    match_counts: VecDeque<usize>,
}

/// Derived health for one strategy key
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorHealth {
    pub queries: u64,
    pub successes: u64,
    pub failures: u64,
    /// Successes that needed a non-primary alternative
    pub fallback_hits: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_selector: Option<String>,
    pub success_rate: f64,
    pub avg_match_count: f64,
    pub is_healthy: bool,
}

/// Tracks success and failure of named lookup strategies
pub struct SelectorHealthMonitor {
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    entries: Mutex<AHashMap<String, HealthCounters>>,
}

impl SelectorHealthMonitor {
    /// Create a monitor with the given thresholds
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            config,
            entries: Mutex::new(AHashMap::new()),
        }
    }

    /// Record one lookup against `key`
    ///
    /// Only a success with at least one match counts as a success.
    pub fn record(&self, key: &str, selector_used: &str, success: bool, match_count: usize) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let counters = entries.entry(key.to_string()).or_default();

        counters.queries += 1;
        counters.last_selector = Some(selector_used.to_string());
        if success && match_count > 0 {
            counters.successes += 1;
            counters.last_success_ms = Some(now);
            counters.match_counts.push_back(match_count);
            while counters.match_counts.len() > self.config.history_len {
                counters.match_counts.pop_front();
            }
        } else {
            counters.failures += 1;
            counters.last_failure_ms = Some(now);
        }
    }

    /// Record a chain resolution, noting when a fallback alternative won
    pub fn record_chain_success(&self, key: &str, index: usize, selector_used: &str, match_count: usize) {
        self.record(key, selector_used, true, match_count);
        if index > 0 {
            if let Some(counters) = self.entries.lock().get_mut(key) {
                counters.fallback_hits += 1;
            }
        }
    }

    /// Health for `key`, or `None` if never recorded
    pub fn health(&self, key: &str) -> Option<SelectorHealth> {
        let entries = self.entries.lock();
        let counters = entries.get(key)?;

        let success_rate = if counters.queries == 0 {
            0.0
        } else {
            counters.successes as f64 / counters.queries as f64
        };
        let avg_match_count = if counters.match_counts.is_empty() {
            0.0
        } else {
            counters.match_counts.iter().sum::<usize>() as f64 / counters.match_counts.len() as f64
        };

        Some(SelectorHealth {
            queries: counters.queries,
            successes: counters.successes,
            failures: counters.failures,
            fallback_hits: counters.fallback_hits,
            last_success_ms: counters.last_success_ms,
            last_failure_ms: counters.last_failure_ms,
            last_selector: counters.last_selector.clone(),
            success_rate,
            avg_match_count,
            is_healthy: success_rate > self.config.healthy_rate && counters.queries >= self.config.min_samples,
        })
    }

    /// Keys among `keys` that have been recorded and are not healthy
    pub fn unhealthy_among<'a>(&self, keys: &[&'a str]) -> Vec<&'a str> {
        keys.iter()
            .copied()
            .filter(|key| self.health(key).is_some_and(|h| !h.is_healthy))
            .collect()
    }

    /// Every recorded key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Forget all history
    pub fn reset_all(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for SelectorHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorHealthMonitor")
            .field("config", &self.config)
            .field("keys", &self.entries.lock().len())
            .finish()
    }
}

/// Successful chain resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMatch<T> {
    /// Ordinal of the alternative that matched (0 = primary)
    pub index: usize,
    /// Selector text of that alternative
    pub selector: String,
    pub value: T,
}

/// Ordered alternative selectors for one logical target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorChain {
    key: String,
    alternatives: Vec<String>,
}

impl SelectorChain {
    /// Create a chain; `alternatives` are tried in order
    pub fn new(key: impl Into<String>, alternatives: Vec<String>) -> Self {
        Self {
            key: key.into(),
            alternatives,
        }
    }

    /// Logical key health is recorded under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Alternatives in priority order
    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    /// Nearest inclusive ancestor matching the first alternative that matches
    pub fn resolve_closest(
        &self,
        cache: &QueryCache,
        health: &SelectorHealthMonitor,
        tree: &NodeTree,
        node: NodeId,
    ) -> Option<ChainMatch<NodeId>> {
        self.resolve(health, |selector| {
            cache.closest_match(tree, node, selector).map(|found| (found, 1))
        })
    }

    /// First descendant matching the first alternative that matches
    pub fn resolve_first(
        &self,
        cache: &QueryCache,
        health: &SelectorHealthMonitor,
        tree: &NodeTree,
        node: NodeId,
    ) -> Option<ChainMatch<NodeId>> {
        self.resolve(health, |selector| {
            cache.first_descendant(tree, node, selector).map(|found| (found, 1))
        })
    }

    /// All descendants for the first alternative with a non-empty result
    pub fn resolve_all(
        &self,
        cache: &QueryCache,
        health: &SelectorHealthMonitor,
        tree: &NodeTree,
        node: NodeId,
    ) -> Option<ChainMatch<Arc<[NodeId]>>> {
        self.resolve(health, |selector| {
            let found = cache.all_descendants(tree, node, selector);
            let count = found.len();
            (count > 0).then_some((found, count))
        })
    }

    fn resolve<T>(
        &self,
        health: &SelectorHealthMonitor,
        mut lookup: impl FnMut(&str) -> Option<(T, usize)>,
    ) -> Option<ChainMatch<T>> {
        for (index, selector) in self.alternatives.iter().enumerate() {
            if let Some((value, count)) = lookup(selector) {
                health.record_chain_success(&self.key, index, selector, count);
                if index > 0 {
                    debug!("Selector chain '{}' fell back to alternative #{}: {}", self.key, index, selector);
                }
                return Some(ChainMatch {
                    index,
                    selector: selector.clone(),
                    value,
                });
            }
        }

        health.record(&self.key, &self.alternatives.join(" | "), false, 0);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::config::QueryCacheConfig;
    use veil_core::ManualClock;

    fn monitor() -> (SelectorHealthMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(100));
        (SelectorHealthMonitor::new(HealthConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn test_sample_floor() {
        let (monitor, _clock) = monitor();

        for _ in 0..8 {
            monitor.record("thumb", "a#thumbnail", true, 3);
        }
        monitor.record("thumb", "a#thumbnail", false, 0);

        // 9 queries, 8 successes: rate is fine but the sample is too small
        let health = monitor.health("thumb").unwrap();
        assert_eq!(health.queries, 9);
        assert!(!health.is_healthy);

        monitor.record("thumb", "a#thumbnail", false, 0);
        let health = monitor.health("thumb").unwrap();
        assert_eq!(health.queries, 10);
        assert_eq!(health.successes, 8);
        assert!((health.success_rate - 0.8).abs() < f64::EPSILON);
        assert!(health.is_healthy);
        assert!((health.avg_match_count - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_matches_count_as_failure() {
        let (monitor, clock) = monitor();
        clock.set(555);
        monitor.record("thumb", "a", true, 0);

        let health = monitor.health("thumb").unwrap();
        assert_eq!(health.failures, 1);
        assert_eq!(health.last_failure_ms, Some(555));
        assert_eq!(health.last_success_ms, None);
    }

    #[test]
    fn test_history_is_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let config = HealthConfig {
            history_len: 3,
            ..Default::default()
        };
        let monitor = SelectorHealthMonitor::new(config, clock);

        for count in [100, 1, 1, 1] {
            monitor.record("k", "s", true, count);
        }
        assert!((monitor.health("k").unwrap().avg_match_count - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unhealthy_among_skips_unseen_keys() {
        let (monitor, _clock) = monitor();
        for _ in 0..10 {
            monitor.record("good", "s", true, 1);
            monitor.record("bad", "s", false, 0);
        }

        assert_eq!(monitor.health("unseen"), None);
        assert_eq!(monitor.unhealthy_among(&["good", "bad", "unseen"]), vec!["bad"]);

        monitor.reset_all();
        assert!(monitor.keys().is_empty());
    }

    #[test]
    fn test_chain_fallback_and_exhaustion() {
        let (monitor, clock) = monitor();
        let cache = QueryCache::new(&QueryCacheConfig::default(), clock);

        let mut tree = NodeTree::new("ytd-app");
        let container = tree.create_element("ytd-grid-video-renderer");
        tree.append_child(tree.root(), container);
        let link = tree.create_element("a");
        tree.append_child(container, link);

        let chain = SelectorChain::new(
            "video_container",
            vec!["ytd-rich-item-renderer".to_string(), "ytd-grid-video-renderer".to_string()],
        );

        let found = chain.resolve_closest(&cache, &monitor, &tree, link).unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(found.value, container);
        assert_eq!(found.selector, "ytd-grid-video-renderer");

        let all = chain.resolve_all(&cache, &monitor, &tree, tree.root()).unwrap();
        assert_eq!(&*all.value, &[container]);

        let missing = SelectorChain::new("badge", vec!["span.badge".to_string(), "div.badge".to_string()]);
        assert!(missing.resolve_first(&cache, &monitor, &tree, container).is_none());

        let health = monitor.health("video_container").unwrap();
        assert_eq!(health.successes, 2);
        assert_eq!(health.fallback_hits, 2);

        // Exhaustion is a single failure, not one per alternative
        let health = monitor.health("badge").unwrap();
        assert_eq!(health.queries, 1);
        assert_eq!(health.failures, 1);
        assert_eq!(health.last_selector.as_deref(), Some("span.badge | div.badge"));
    }
}
