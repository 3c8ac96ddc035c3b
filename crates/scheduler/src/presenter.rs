//! Class-state writes onto containers

use veil_core::config::ClassConfig;
use veil_core::{NodeId, NodeTree, VisualState};

/// Class names carried by dimmed and hidden containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
    dimmed: String,
    hidden: String,
}

impl ClassNames {
    pub fn new(dimmed: impl Into<String>, hidden: impl Into<String>) -> Self {
        Self {
            dimmed: dimmed.into(),
            hidden: hidden.into(),
        }
    }

    pub fn from_config(config: &ClassConfig) -> Self {
        Self::new(config.dimmed.clone(), config.hidden.clone())
    }

    /// Class written for `state`, if any
    pub fn class_for(&self, state: VisualState) -> Option<&str> {
        match state {
            VisualState::Normal => None,
            VisualState::Dimmed => Some(self.dimmed.as_str()),
            VisualState::Hidden => Some(self.hidden.as_str()),
        }
    }

    /// State currently shown by `node`'s classes
    pub fn state_of(&self, tree: &NodeTree, node: NodeId) -> VisualState {
        if tree.has_class(node, &self.hidden) {
            VisualState::Hidden
        } else if tree.has_class(node, &self.dimmed) {
            VisualState::Dimmed
        } else {
            VisualState::Normal
        }
    }

    /// Make `node` carry exactly the class for `state`
    ///
    /// Conflicting classes are removed before the new one is added. Returns
    /// true if the class list changed.
    pub fn apply_state(&self, tree: &mut NodeTree, node: NodeId, state: VisualState) -> bool {
        let wanted = self.class_for(state);
        let mut changed = false;

        for class in [&self.dimmed, &self.hidden] {
            if Some(class.as_str()) != wanted {
                changed |= tree.remove_class(node, class);
            }
        }
        if let Some(class) = wanted {
            changed |= tree.add_class(node, class);
        }
        changed
    }

    /// Remove both classes from every node; returns how many nodes changed
    pub fn strip_all(&self, tree: &mut NodeTree) -> usize {
        let marked: Vec<NodeId> = std::iter::once(tree.root())
            .chain(tree.descendants(tree.root()))
            .filter(|&node| tree.has_class(node, &self.dimmed) || tree.has_class(node, &self.hidden))
            .collect();

        for &node in &marked {
            tree.remove_class(node, &self.dimmed);
            tree.remove_class(node, &self.hidden);
        }
        marked.len()
    }
}

impl Default for ClassNames {
    fn default() -> Self {
        Self::from_config(&ClassConfig::default())
    }
}
