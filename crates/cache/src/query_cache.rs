//! Cache of structural lookups over the node tree
//!
//! Two scopes with different invalidation strategies:
//! - node-scoped: results of `closest` / `first` / `all` lookups keyed by
//!   the querying node and selector. Dropped per node when that node is
//!   removed; ids of freed nodes never match again, so leftovers are inert
//!   and reclaimed by [`QueryCache::prune_dead`].
//! - tree-wide: whole-document lookups keyed by selector, with a TTL and
//!   exact-key, pattern, or full invalidation. A removal cannot be mapped
//!   to the selectors it affects, so these rely on TTL plus patterns.
//!
//! Every lookup is fail-soft: an unparsable selector is logged, answered
//! with an empty result, and never cached.

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use veil_core::config::QueryCacheConfig;
use veil_core::{Clock, NodeId, NodeTree, Selector, SelectorPattern};

/// Node-scoped results for one node
#[derive(Debug, Default)]
struct NodeScoped {
    closest: AHashMap<String, Option<NodeId>>,
    first: AHashMap<String, Option<NodeId>>,
    all: AHashMap<String, Arc<[NodeId]>>,
}

#[derive(Debug)]
struct TreeEntry {
    results: Arc<[NodeId]>,
    timestamp: u64,
    ttl_ms: u64,
}

/// Which tree-wide entries to drop
#[derive(Debug, Clone, Copy)]
pub enum InvalidationTarget<'a> {
    /// Every tree-wide entry
    All,
    /// One exact selector key
    Key(&'a str),
    /// Every key matching a glob pattern
    Pattern(&'a SelectorPattern),
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped by explicit invalidation
    pub invalidations: u64,
    /// Lookups answered without caching (unparsable selector)
    pub uncached: u64,
}

impl QueryStats {
    /// Fraction of cached lookups that hit
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    uncached: AtomicU64,
}

/// Node-scoped and tree-wide lookup cache
pub struct QueryCache {
    clock: Arc<dyn Clock>,
    default_ttl_ms: u64,
    max_tree_entries: usize,
    categories: Vec<SelectorPattern>,
    nodes: DashMap<NodeId, NodeScoped, ahash::RandomState>,
    tree_wide: Mutex<AHashMap<String, TreeEntry>>,
    counters: Counters,
}

impl QueryCache {
    /// Create a cache from configuration
    pub fn new(config: &QueryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            default_ttl_ms: config.default_ttl_ms,
            max_tree_entries: config.max_tree_entries.max(1),
            categories: config
                .category_patterns
                .iter()
                .filter_map(|p| match SelectorPattern::new(p.as_str()) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        warn!("Skipping category pattern: {}", e);
                        None
                    }
                })
                .collect(),
            nodes: DashMap::with_hasher(ahash::RandomState::new()),
            tree_wide: Mutex::new(AHashMap::new()),
            counters: Counters::default(),
        }
    }

    /// TTL applied when a caller passes none
    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// Nearest inclusive ancestor of `node` matching `selector`
    pub fn closest_match(&self, tree: &NodeTree, node: NodeId, selector: &str) -> Option<NodeId> {
        let cached = self
            .nodes
            .get(&node)
            .and_then(|scoped| scoped.closest.get(selector).copied());
        if let Some(result) = cached {
            if result.map_or(true, |n| tree.is_alive(n)) {
                self.hit();
                return result;
            }
        }

        let parsed = self.parse(selector)?;
        let result = tree.closest(node, &parsed);
        if tree.is_alive(node) {
            self.nodes
                .entry(node)
                .or_default()
                .closest
                .insert(selector.to_string(), result);
        }
        self.miss();
        result
    }

    /// First descendant of `node` matching `selector`
    pub fn first_descendant(&self, tree: &NodeTree, node: NodeId, selector: &str) -> Option<NodeId> {
        let cached = self
            .nodes
            .get(&node)
            .and_then(|scoped| scoped.first.get(selector).copied());
        if let Some(result) = cached {
            if result.map_or(true, |n| tree.is_alive(n)) {
                self.hit();
                return result;
            }
        }

        let parsed = self.parse(selector)?;
        let result = tree.query_first(node, &parsed);
        if tree.is_alive(node) {
            self.nodes
                .entry(node)
                .or_default()
                .first
                .insert(selector.to_string(), result);
        }
        self.miss();
        result
    }

    /// All descendants of `node` matching `selector`
    pub fn all_descendants(&self, tree: &NodeTree, node: NodeId, selector: &str) -> Arc<[NodeId]> {
        let cached = self
            .nodes
            .get(&node)
            .and_then(|scoped| scoped.all.get(selector).cloned());
        if let Some(results) = cached {
            if results.iter().all(|&n| tree.is_alive(n)) {
                self.hit();
                return results;
            }
        }

        let Some(parsed) = self.parse(selector) else {
            return Arc::from(Vec::new());
        };
        let results: Arc<[NodeId]> = tree.query_all(node, &parsed).into();
        if tree.is_alive(node) {
            self.nodes
                .entry(node)
                .or_default()
                .all
                .insert(selector.to_string(), results.clone());
        }
        self.miss();
        results
    }

    /// Whole-document lookup, cached for `ttl_ms` (default TTL if `None`)
    ///
    /// Two calls within the TTL return the same `Arc`.
    pub fn tree_query(&self, tree: &NodeTree, selector: &str, ttl_ms: Option<u64>) -> Arc<[NodeId]> {
        let now = self.clock.now_ms();
        let ttl_ms = ttl_ms.unwrap_or(self.default_ttl_ms);

        {
            let entries = self.tree_wide.lock();
            if let Some(entry) = entries.get(selector) {
                if now.saturating_sub(entry.timestamp) < ttl_ms {
                    self.hit();
                    return entry.results.clone();
                }
            }
        }

        let Some(parsed) = self.parse(selector) else {
            return Arc::from(Vec::new());
        };
        let results: Arc<[NodeId]> = tree.query_document(&parsed).into();

        let mut entries = self.tree_wide.lock();
        if entries.len() >= self.max_tree_entries && !entries.contains_key(selector) {
            Self::make_room(&mut entries, self.max_tree_entries, now);
        }
        entries.insert(
            selector.to_string(),
            TreeEntry {
                results: results.clone(),
                timestamp: now,
                ttl_ms,
            },
        );
        self.miss();
        results
    }

    /// Drop every node-scoped entry for `node`
    pub fn invalidate_node(&self, node: NodeId) -> bool {
        let removed = self.nodes.remove(&node).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop tree-wide entries; returns how many were removed
    pub fn invalidate_tree_query(&self, target: InvalidationTarget<'_>) -> usize {
        let mut entries = self.tree_wide.lock();
        let before = entries.len();
        match target {
            InvalidationTarget::All => entries.clear(),
            InvalidationTarget::Key(key) => {
                entries.remove(key);
            }
            InvalidationTarget::Pattern(pattern) => entries.retain(|key, _| !pattern.matches(key)),
        }
        let removed = before - entries.len();
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Invalidate every configured structural category at once
    ///
    /// Used after a batch of additions/removals; cheaper than clearing
    /// unrelated entries.
    pub fn invalidate_by_category(&self) -> usize {
        let mut entries = self.tree_wide.lock();
        let before = entries.len();
        entries.retain(|key, _| !self.categories.iter().any(|p| p.matches(key)));
        let removed = before - entries.len();
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!("Invalidated {} tree-wide query entries by category", removed);
        }
        removed
    }

    /// Drop the tree-wide cache
    ///
    /// Node-scoped entries stay; they die with their nodes.
    pub fn clear_all(&self) {
        self.tree_wide.lock().clear();
    }

    /// Drop node-scoped entries whose node has been freed
    pub fn prune_dead(&self, tree: &NodeTree) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|node, _| tree.is_alive(*node));
        before - self.nodes.len()
    }

    /// Nodes with node-scoped entries
    pub fn node_entries(&self) -> usize {
        self.nodes.len()
    }

    /// Tree-wide entries
    pub fn tree_entries(&self) -> usize {
        self.tree_wide.lock().len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> QueryStats {
        QueryStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            uncached: self.counters.uncached.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters
    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.invalidations.store(0, Ordering::Relaxed);
        self.counters.uncached.store(0, Ordering::Relaxed);
    }

    /// Sweep expired entries, then fall back to dropping the oldest
    ///
    /// Each entry expires by its own TTL, not the default one.
    fn make_room(entries: &mut AHashMap<String, TreeEntry>, max: usize, now: u64) {
        entries.retain(|_, entry| now.saturating_sub(entry.timestamp) < entry.ttl_ms);

        while entries.len() >= max {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn parse(&self, selector: &str) -> Option<Selector> {
        match Selector::parse(selector) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Uncached lookup for malformed selector: {}", e);
                self.counters.uncached.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("default_ttl_ms", &self.default_ttl_ms)
            .field("node_entries", &self.node_entries())
            .field("tree_entries", &self.tree_entries())
            .field("stats", &self.stats())
            .finish()
    }
}
