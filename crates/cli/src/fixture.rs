//! JSON feed and record-store fixtures
//!
//! A feed is a nested element description:
//!
//! ```json
//! {
//!   "tag": "ytd-app",
//!   "children": [
//!     {
//!       "tag": "ytd-rich-item-renderer",
//!       "visible": true,
//!       "children": [{ "tag": "a", "attributes": { "href": "/watch?v=abc" } }]
//!     }
//!   ]
//! }
//! ```
//!
//! A store is a JSON array of video state records.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use veil_core::{NodeId, NodeTree, VideoStateRecord};

/// One element in a feed fixture
#[derive(Debug, Clone, Deserialize)]
pub struct FeedNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub classes: Vec<String>,
    /// Starts on screen
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub children: Vec<FeedNode>,
}

/// Tree built from a feed, plus the nodes flagged visible
#[derive(Debug)]
pub struct Feed {
    pub tree: NodeTree,
    pub visible: Vec<NodeId>,
}

impl Feed {
    /// Build a tree; the fixture's root element becomes the tree root
    pub fn build(root: &FeedNode) -> Self {
        let mut tree = NodeTree::new(&root.tag);
        let mut visible = Vec::new();

        let root_id = tree.root();
        decorate(&mut tree, root_id, root, &mut visible);
        for child in &root.children {
            attach(&mut tree, root_id, child, &mut visible);
        }

        // Fixture construction is not an observed change
        tree.take_mutations();
        Self { tree, visible }
    }
}

fn attach(tree: &mut NodeTree, parent: NodeId, element: &FeedNode, visible: &mut Vec<NodeId>) {
    let node = tree.create_element(&element.tag);
    tree.append_child(parent, node);
    decorate(tree, node, element, visible);
    for child in &element.children {
        attach(tree, node, child, visible);
    }
}

fn decorate(tree: &mut NodeTree, node: NodeId, element: &FeedNode, visible: &mut Vec<NodeId>) {
    for (name, value) in &element.attributes {
        tree.set_attribute(node, name, value);
    }
    for class in &element.classes {
        tree.add_class(node, class);
    }
    if element.visible {
        visible.push(node);
    }
}

/// Load and build a feed fixture
pub fn load_feed(path: &Path) -> Result<Feed> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read feed {}", path.display()))?;
    let root: FeedNode =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse feed {}", path.display()))?;
    Ok(Feed::build(&root))
}

/// Load a record store fixture
pub fn load_store(path: &Path) -> Result<Vec<VideoStateRecord>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read store {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse store {}", path.display()))
}
