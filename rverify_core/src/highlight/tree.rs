//! Arena-backed presentation tree for one side of a highlighted pair.

use crate::rules::path::strip_parent;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rverify_common::{ResultType, VerifyError};
use serde::Serialize;
use std::collections::HashMap;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct HighlighterNode {
    pub name: String,
    pub value: Option<String>,
    /// Set once the node has been flattened; a plain node never regains children.
    pub plain: bool,
    pub encoded: bool,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub row: Option<usize>,
    /// Row of the real node a placeholder stands in for
    pub linked_row: Option<usize>,
    pub status: Option<ResultType>,
    pub path: Option<String>,
}

impl HighlighterNode {
    fn new(name: impl Into<String>, value: Option<String>, path: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
            plain: false,
            encoded: false,
            children: Vec::new(),
            parent: None,
            row: None,
            linked_row: None,
            status: None,
            path,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == Some(ResultType::Hidden)
    }

    /// Record `status` unless the node already carries a worse one.
    pub fn mark(&mut self, status: ResultType) {
        self.status = Some(match self.status {
            Some(current) if current != ResultType::Hidden => {
                ResultType::worst([current, status])
            }
            _ => status,
        });
    }
}

#[derive(Debug, Clone)]
pub struct HighlightTree {
    nodes: Vec<HighlighterNode>,
    index: HashMap<String, NodeId>,
}

impl HighlightTree {
    pub fn new(name: impl Into<String>, value: Option<String>, path: Option<String>) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };
        tree.push(HighlighterNode::new(name, value, path));
        tree
    }

    pub const ROOT: NodeId = 0;

    pub fn node(&self, id: NodeId) -> &HighlighterNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut HighlighterNode {
        &mut self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        value: Option<String>,
        path: Option<String>,
    ) -> NodeId {
        let position = self.nodes[parent].children.len();
        self.insert_child(parent, position, HighlighterNode::new(name, value, path))
    }

    /// Alignment-only node inserted at `position` (clamped) under `parent`
    pub fn insert_placeholder(&mut self, parent: NodeId, position: usize) -> NodeId {
        let mut node = HighlighterNode::new("", None, None);
        node.status = Some(ResultType::Hidden);
        node.plain = true;
        let position = position.min(self.nodes[parent].children.len());
        self.insert_child(parent, position, node)
    }

    fn insert_child(&mut self, parent: NodeId, position: usize, mut node: HighlighterNode) -> NodeId {
        node.parent = Some(parent);
        let id = self.push(node);
        self.nodes[parent].children.insert(position, id);
        id
    }

    fn push(&mut self, node: HighlighterNode) -> NodeId {
        let id = self.nodes.len();
        if let Some(path) = &node.path {
            self.index.insert(path.clone(), id);
        }
        self.nodes.push(node);
        id
    }

    /// Node registered under a comparator locator, `parent:` markers ignored
    pub fn find_by_path(&self, locator: &str) -> Option<NodeId> {
        self.index.get(strip_parent(locator)).copied()
    }

    pub fn depth(&self, mut id: NodeId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nodes[id].parent {
            depth += 1;
            id = parent;
        }
        depth
    }

    /// Decoded value of the node itself
    pub fn decode_value(&self, id: NodeId) -> Result<Option<String>, VerifyError> {
        let node = &self.nodes[id];
        match &node.value {
            Some(value) if node.encoded => {
                let bytes = STANDARD.decode(value).map_err(|e| {
                    VerifyError::malformed(format!("Highlight value is not valid base64: {}", e))
                })?;
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| VerifyError::malformed(format!("Highlight value is not UTF-8: {}", e)))
            }
            other => Ok(other.clone()),
        }
    }

    /// Text of the subtree: a leaf's value, or `{name=..., ...}` over the children.
    pub fn compose(&self, id: NodeId) -> Result<String, VerifyError> {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            return Ok(self.decode_value(id)?.unwrap_or_default());
        }
        let mut parts = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            if self.nodes[child].is_placeholder() {
                continue;
            }
            let text = self.compose(child)?;
            let name = &self.nodes[child].name;
            parts.push(if name.is_empty() {
                text
            } else {
                format!("{}={}", name, text)
            });
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    }

    /// Collapse the subtree into one plain node; descendants' locators resolve to it afterwards.
    pub fn convert_to_plain(&mut self, id: NodeId, encode: bool) -> Result<(), VerifyError> {
        if self.nodes[id].plain {
            return Ok(());
        }
        let composed = self.compose(id)?;

        let mut stack = std::mem::take(&mut self.nodes[id].children);
        while let Some(child) = stack.pop() {
            stack.extend(std::mem::take(&mut self.nodes[child].children));
            if let Some(path) = self.nodes[child].path.clone() {
                self.index.insert(path, id);
            }
            self.nodes[child].parent = None;
        }

        let node = &mut self.nodes[id];
        node.value = Some(composed);
        node.encoded = false;
        node.plain = true;
        if encode {
            self.encode(id);
        }
        Ok(())
    }

    /// Base64-encode every value below `id`; plain nodes are encoded in place.
    pub fn encode(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current];
            if node.children.is_empty() || node.plain {
                if !node.encoded {
                    if let Some(value) = &node.value {
                        node.value = Some(STANDARD.encode(value.as_bytes()));
                        node.encoded = true;
                    }
                }
            } else {
                stack.extend(node.children.iter().copied());
            }
        }
    }

    pub fn to_view(&self, id: NodeId) -> HighlightView {
        let node = &self.nodes[id];
        HighlightView {
            name: node.name.clone(),
            value: node.value.clone(),
            plain: node.plain,
            encoded: node.encoded,
            row: node.row,
            linked_row: node.linked_row,
            status: node.status,
            path: node.path.clone(),
            children: node.children.iter().map(|c| self.to_view(*c)).collect(),
        }
    }
}

/// Serializable snapshot of a highlight tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub plain: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub encoded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HighlightView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (HighlightTree, NodeId) {
        let mut tree = HighlightTree::new("$", None, Some("$".into()));
        let book = tree.add_child(HighlightTree::ROOT, "book", None, Some("$.book".into()));
        tree.add_child(book, "title", Some("Dune".into()), Some("$.book.title".into()));
        let tags = tree.add_child(book, "tags", None, Some("$.book.tags".into()));
        tree.add_child(tags, "", Some("sf".into()), Some("$.book.tags[0]".into()));
        (tree, book)
    }

    #[test]
    fn test_convert_to_plain_postconditions() {
        let (mut tree, book) = sample();
        tree.convert_to_plain(book, false).unwrap();
        let node = tree.node(book);
        assert!(node.plain);
        assert!(node.children.is_empty());
        assert_eq!(node.value.as_deref(), Some("{title=Dune, tags={sf}}"));
        assert_eq!(tree.find_by_path("$.book.tags[0]"), Some(book));
    }

    #[test]
    fn test_encode_then_decode_round_trip() {
        let (mut tree, book) = sample();
        tree.convert_to_plain(book, false).unwrap();
        let composed = tree.compose(book).unwrap();
        tree.encode(HighlightTree::ROOT);
        assert!(tree.node(book).encoded);
        assert_ne!(tree.node(book).value.as_deref(), Some(composed.as_str()));
        assert_eq!(tree.compose(book).unwrap(), composed);

        let (mut encoded, book) = sample();
        encoded.convert_to_plain(book, true).unwrap();
        assert_eq!(encoded.decode_value(book).unwrap(), Some(composed));
    }

    #[test]
    fn test_encode_reaches_every_leaf_once() {
        let (mut tree, _) = sample();
        tree.encode(HighlightTree::ROOT);
        tree.encode(HighlightTree::ROOT);
        let title = tree.find_by_path("$.book.title").unwrap();
        assert_eq!(tree.decode_value(title).unwrap().as_deref(), Some("Dune"));
    }

    #[test]
    fn test_placeholders_and_positions() {
        let (mut tree, book) = sample();
        let hidden = tree.insert_placeholder(book, 1);
        assert!(tree.node(hidden).is_placeholder());
        assert_eq!(tree.children(book)[1], hidden);
        assert_eq!(tree.depth(hidden), 2);
        assert_eq!(tree.compose(book).unwrap(), "{title=Dune, tags={sf}}");
    }

    #[test]
    fn test_find_by_path_ignores_parent_marker() {
        let mut tree = HighlightTree::new("root", None, Some("root".into()));
        let attr = tree.add_child(HighlightTree::ROOT, "@id", Some("1".into()), Some("root/@id".into()));
        assert_eq!(tree.find_by_path("parent:root/@id"), Some(attr));
        assert_eq!(tree.find_by_path("root/@missing"), None);
    }
}
