//! Item discovery in the feed tree
//!
//! Items are identified two ways: an id attribute on the item markup, and
//! video links whose URL embeds the id. Both routes may find the same id;
//! [`CandidateSet`] keeps each id once along with every node it came from.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use veil_cache::{QueryCache, SelectorChain, SelectorHealthMonitor};
use veil_core::config::SchedulerConfig;
use veil_core::{NodeId, NodeTree};

/// Key health for container lookups is recorded under
pub const CONTAINER_CHAIN_KEY: &str = "video_container";

/// Extract a video id from a watch or shorts URL
///
/// ```
/// use veil_scheduler::locate::extract_video_id;
/// assert_eq!(extract_video_id("/watch?v=dQw4w9WgXcQ&t=42"), Some("dQw4w9WgXcQ".to_string()));
/// assert_eq!(extract_video_id("/shorts/abc_123?feature=share"), Some("abc_123".to_string()));
/// assert_eq!(extract_video_id("/channel/xyz"), None);
/// ```
pub fn extract_video_id(href: &str) -> Option<String> {
    let candidate = if let Some(pos) = href.find("/shorts/") {
        &href[pos + "/shorts/".len()..]
    } else {
        let (path, query) = href.split_once('?')?;
        if !path.ends_with("/watch") && path != "watch" {
            return None;
        }
        query.split('&').find_map(|param| param.strip_prefix("v="))?
    };

    let id: String = candidate
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Ids found in one scan, in discovery order, with their source nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    ids: Vec<String>,
    sources: AHashMap<String, SmallVec<[NodeId; 2]>>,
}

impl CandidateSet {
    /// Record that `node` carries `id`
    pub fn push(&mut self, id: String, node: NodeId) {
        match self.sources.get_mut(&id) {
            Some(nodes) => {
                if !nodes.contains(&node) {
                    nodes.push(node);
                }
            }
            None => {
                self.ids.push(id.clone());
                self.sources.insert(id, SmallVec::from_elem(node, 1));
            }
        }
    }

    /// Distinct ids in discovery order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Nodes `id` was found on
    pub fn sources(&self, id: &str) -> &[NodeId] {
        self.sources.get(id).map(|nodes| nodes.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Finds item ids and their containers
#[derive(Debug, Clone)]
pub struct ItemLocator {
    id_attribute: String,
    id_selector: String,
    link_selector: String,
    containers: SelectorChain,
}

impl ItemLocator {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            id_attribute: config.id_attribute.clone(),
            id_selector: format!("[{}]", config.id_attribute),
            link_selector: config.link_selector.clone(),
            containers: SelectorChain::new(CONTAINER_CHAIN_KEY, config.container_selectors.clone()),
        }
    }

    /// Container selector chain
    pub fn containers(&self) -> &SelectorChain {
        &self.containers
    }

    /// Every item in the document (full scan)
    pub fn collect_all(&self, tree: &NodeTree, cache: &QueryCache) -> CandidateSet {
        let mut set = CandidateSet::default();
        for &node in cache.tree_query(tree, &self.id_selector, None).iter() {
            self.push_attribute(tree, node, &mut set);
        }
        for &node in cache.tree_query(tree, &self.link_selector, None).iter() {
            self.push_link(tree, node, &mut set);
        }
        set
    }

    /// Items on or under the visible nodes
    pub fn collect_visible(&self, tree: &NodeTree, cache: &QueryCache, visible: &AHashSet<NodeId>) -> CandidateSet {
        let mut roots: Vec<NodeId> = visible.iter().copied().filter(|&n| tree.is_alive(n)).collect();
        roots.sort();

        let mut set = CandidateSet::default();
        for root in roots {
            self.push_attribute(tree, root, &mut set);
            self.push_link(tree, root, &mut set);
            for &node in cache.all_descendants(tree, root, &self.id_selector).iter() {
                self.push_attribute(tree, node, &mut set);
            }
            for &node in cache.all_descendants(tree, root, &self.link_selector).iter() {
                self.push_link(tree, node, &mut set);
            }
        }
        set
    }

    /// Container holding `source`, via the container chain
    pub fn container_for(
        &self,
        tree: &NodeTree,
        cache: &QueryCache,
        health: &SelectorHealthMonitor,
        source: NodeId,
    ) -> Option<NodeId> {
        self.containers
            .resolve_closest(cache, health, tree, source)
            .map(|found| found.value)
    }

    fn push_attribute(&self, tree: &NodeTree, node: NodeId, set: &mut CandidateSet) {
        if let Some(id) = tree.attribute(node, &self.id_attribute) {
            let id = id.trim();
            if !id.is_empty() {
                set.push(id.to_string(), node);
            }
        }
    }

    fn push_link(&self, tree: &NodeTree, node: NodeId, set: &mut CandidateSet) {
        if tree.tag(node) != Some("a") {
            return;
        }
        if let Some(id) = tree.attribute(node, "href").and_then(extract_video_id) {
            set.push(id, node);
        }
    }
}
