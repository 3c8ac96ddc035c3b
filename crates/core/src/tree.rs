//! Arena-backed node tree for the live feed
//!
//! Nodes live in slots addressed by [`NodeId`]. Freeing a slot bumps its
//! generation, so an id held past its node's removal never aliases a node
//! that later reuses the slot. Per-node side tables keyed by `NodeId`
//! therefore go stale harmlessly and can be pruned with [`NodeTree::is_alive`].
//!
//! Every structural or attribute change is appended to a mutation log that
//! observers drain with [`NodeTree::take_mutations`].

use crate::selector::Selector;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Tree shared between the scheduler, maintenance tasks, and the host
pub type SharedTree = Arc<Mutex<NodeTree>>;

/// Stable handle to a node slot
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index (diagnostics only)
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

/// A single change observed on the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// `node` was attached under `parent`
    Added { node: NodeId, parent: NodeId },
    /// `node` was detached from `parent`; `subtree` lists `node` and all of
    /// its descendants at the time of removal
    Removed {
        node: NodeId,
        parent: Option<NodeId>,
        subtree: Vec<NodeId>,
    },
    /// An attribute (or the class list, reported as `class`) changed
    AttributeChanged { node: NodeId, name: String },
}

#[derive(Debug)]
struct Node {
    tag: String,
    classes: SmallVec<[String; 4]>,
    attributes: SmallVec<[(String, String); 4]>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Mutable tree of element-like nodes
#[derive(Debug)]
pub struct NodeTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
    mutations: Vec<Mutation>,
}

impl NodeTree {
    /// Create a tree with a single root element
    pub fn new(root_tag: &str) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            live: 0,
            mutations: Vec::new(),
        };
        tree.root = tree.create_element(root_tag);
        tree
    }

    /// Wrap in a [`SharedTree`]
    pub fn into_shared(self) -> SharedTree {
        Arc::new(Mutex::new(self))
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes (attached or detached)
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if the tree holds no nodes besides the root
    pub fn is_empty(&self) -> bool {
        self.live <= 1
    }

    /// Allocate a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let node = Node {
            tag: tag.to_string(),
            classes: SmallVec::new(),
            attributes: SmallVec::new(),
            parent: None,
            children: Vec::new(),
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Check if `id` still refers to a live node
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Check if `id` is reachable from the root
    pub fn is_connected(&self, id: NodeId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        id == self.root || self.ancestors(id).any(|a| a == self.root)
    }

    /// Attach `child` as the last child of `parent`
    ///
    /// An already-attached child is moved (recorded as a removal followed by
    /// an addition). Returns false if either node is dead or the move would
    /// create a cycle.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.is_alive(parent) || !self.is_alive(child) || child == self.root {
            return false;
        }
        if parent == child || self.ancestors(parent).any(|a| a == child) {
            return false;
        }

        if let Some(old_parent) = self.parent(child) {
            let subtree = self.subtree(child);
            self.detach(child, old_parent);
            self.mutations.push(Mutation::Removed {
                node: child,
                parent: Some(old_parent),
                subtree,
            });
        }

        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        self.mutations.push(Mutation::Added { node: child, parent });
        true
    }

    /// Remove `id` and its whole subtree, freeing their slots
    ///
    /// Returns every freed id (the node first, then descendants in
    /// pre-order). The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> Vec<NodeId> {
        if id == self.root || !self.is_alive(id) {
            return Vec::new();
        }

        let subtree = self.subtree(id);
        let parent = self.parent(id);
        if let Some(parent) = parent {
            self.detach(id, parent);
        }

        for &freed in &subtree {
            let slot = &mut self.slots[freed.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(freed.index);
            self.live -= 1;
        }

        self.mutations.push(Mutation::Removed {
            node: id,
            parent,
            subtree: subtree.clone(),
        });
        subtree
    }

    /// Tag name
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.tag.as_str())
    }

    /// Parent node, if attached
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Child nodes in order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Attribute value
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, recording a mutation if the value changed
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        let Some(node) = self.node_mut(id) else {
            return;
        };

        match node.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) if existing == value => return,
            Some((_, existing)) => *existing = value.to_string(),
            None => node.attributes.push((name.to_string(), value.to_string())),
        }

        self.mutations.push(Mutation::AttributeChanged {
            node: id,
            name: name.to_string(),
        });
    }

    /// Remove an attribute, recording a mutation if it was present
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
        let Some(node) = self.node_mut(id) else {
            return;
        };

        let before = node.attributes.len();
        node.attributes.retain(|(key, _)| key != name);
        if node.attributes.len() != before {
            self.mutations.push(Mutation::AttributeChanged {
                node: id,
                name: name.to_string(),
            });
        }
    }

    /// Class list
    pub fn classes(&self, id: NodeId) -> &[String] {
        self.node(id).map(|n| n.classes.as_slice()).unwrap_or(&[])
    }

    /// Check for a class
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).iter().any(|c| c == class)
    }

    /// Add a class; returns true if it was not already present
    pub fn add_class(&mut self, id: NodeId, class: &str) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        if node.classes.iter().any(|c| c == class) {
            return false;
        }
        node.classes.push(class.to_string());
        self.record_class_change(id);
        true
    }

    /// Remove a class; returns true if it was present
    pub fn remove_class(&mut self, id: NodeId, class: &str) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        let before = node.classes.len();
        node.classes.retain(|c| c != class);
        if node.classes.len() == before {
            return false;
        }
        self.record_class_change(id);
        true
    }

    /// Ancestors from parent up to the root
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Descendants of `id` in pre-order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(id).to_vec();
        stack.reverse();
        Descendants { tree: self, stack }
    }

    /// Check whether a live node matches `selector`
    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.is_alive(id) && selector.matches(self, id)
    }

    /// Nearest inclusive ancestor matching `selector`
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        if !self.is_alive(id) {
            return None;
        }
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&candidate| selector.matches(self, candidate))
    }

    /// First descendant (pre-order) matching `selector`
    pub fn query_first(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(id).find(|&d| selector.matches(self, d))
    }

    /// All descendants matching `selector`, in pre-order
    pub fn query_all(&self, id: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(id).filter(|&d| selector.matches(self, d)).collect()
    }

    /// All connected nodes (root included) matching `selector`
    pub fn query_document(&self, selector: &Selector) -> Vec<NodeId> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .filter(|&d| selector.matches(self, d))
            .collect()
    }

    /// Drain the mutation log
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    /// Mutations recorded but not yet drained
    pub fn pending_mutations(&self) -> usize {
        self.mutations.len()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        std::iter::once(id).chain(self.descendants(id)).collect()
    }

    fn detach(&mut self, child: NodeId, parent: NodeId) {
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&c| c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    fn record_class_change(&mut self, id: NodeId) {
        self.mutations.push(Mutation::AttributeChanged {
            node: id,
            name: "class".to_string(),
        });
    }
}

/// Iterator over a node's ancestors
pub struct Ancestors<'a> {
    tree: &'a NodeTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

/// Pre-order iterator over a node's descendants
pub struct Descendants<'a> {
    tree: &'a NodeTree,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(current).iter().rev().copied());
        Some(current)
    }
}
