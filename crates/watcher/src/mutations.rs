//! Routing of tree mutation batches
//!
//! Turns a drained mutation log into cache invalidation:
//! - removed nodes lose their node-scoped query entries and leave the
//!   visible set (when freed)
//! - the parent of an added or removed node, and every ancestor above it,
//!   loses its node-scoped entries so descendant lookups rescan
//! - additions/removals invalidate structural tree-wide categories, once
//!   per batch
//! - changes to the item id attribute or `href` are treated as structural
//!
//! Class changes are ignored; the scheduler itself writes classes and must
//! not retrigger on its own output.

use crate::visibility::VisibilityTracker;
use ahash::AHashSet;
use tracing::debug;
use veil_cache::QueryCache;
use veil_core::{Mutation, NodeId, NodeTree};

/// What a batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub added: usize,
    pub removed: usize,
    pub attribute_changes: usize,
    /// Node-scoped entries dropped
    pub nodes_invalidated: usize,
    /// Tree-wide entries dropped by category invalidation
    pub tree_entries_invalidated: usize,
    /// Item-bearing structure changed; a new pass should run
    pub needs_pass: bool,
}

/// Routes mutation batches to the query cache and visibility tracker
#[derive(Debug, Clone)]
pub struct MutationRouter {
    structural_attributes: Vec<String>,
}

impl MutationRouter {
    /// `id_attribute` is the attribute carrying item ids
    pub fn new(id_attribute: &str) -> Self {
        Self {
            structural_attributes: vec![id_attribute.to_string(), "href".to_string()],
        }
    }

    /// Apply one batch
    pub fn route(
        &self,
        batch: &[Mutation],
        tree: &NodeTree,
        cache: &QueryCache,
        visibility: &VisibilityTracker,
    ) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let mut structural = false;
        let mut invalidated: AHashSet<NodeId> = AHashSet::new();

        for mutation in batch {
            match mutation {
                Mutation::Added { parent, .. } => {
                    outcome.added += 1;
                    structural = true;
                    invalidate_path(tree, cache, *parent, &mut invalidated, &mut outcome);
                }
                Mutation::Removed { subtree, parent, .. } => {
                    outcome.removed += 1;
                    structural = true;
                    for &node in subtree {
                        if invalidated.insert(node) && cache.invalidate_node(node) {
                            outcome.nodes_invalidated += 1;
                        }
                        if !tree.is_alive(node) {
                            visibility.forget(node);
                        }
                    }
                    if let Some(parent) = parent {
                        invalidate_path(tree, cache, *parent, &mut invalidated, &mut outcome);
                    }
                }
                Mutation::AttributeChanged { node, name } => {
                    if self.structural_attributes.iter().any(|a| a == name) {
                        outcome.attribute_changes += 1;
                        structural = true;
                        invalidate_path(tree, cache, *node, &mut invalidated, &mut outcome);
                    }
                }
            }
        }

        if structural {
            outcome.tree_entries_invalidated = cache.invalidate_by_category();
            outcome.needs_pass = true;
            debug!(
                "Routed mutation batch: {} added, {} removed, {} id/link changes",
                outcome.added, outcome.removed, outcome.attribute_changes
            );
        }
        outcome
    }
}

/// Drop node-scoped entries for `start` and each of its ancestors
fn invalidate_path(
    tree: &NodeTree,
    cache: &QueryCache,
    start: NodeId,
    invalidated: &mut AHashSet<NodeId>,
    outcome: &mut RouteOutcome,
) {
    for node in std::iter::once(start).chain(tree.ancestors(start)) {
        if invalidated.insert(node) && cache.invalidate_node(node) {
            outcome.nodes_invalidated += 1;
        }
    }
}
