//! Path-addressable document tree shared by every content type.
//!
//! # Data Flow
//! ```text
//! body bytes
//!     → content abstraction parse
//!     → Document (arena of nodes, root = first node)
//!     → modifier scripts mutate through path lookups (path.rs)
//!     → content abstraction serialize
//! ```
//!
//! # Design Decisions
//! - Nodes live in a flat arena addressed by `NodeId`; detaching a subtree only
//!   rewires ids, the storage itself is never freed during a request
//! - Paths are parsed and resolved on every call, so a later modifier sees the
//!   structure left behind by an earlier one
//! - A document that was never mutated serializes back to its source bytes

pub mod path;

pub use path::Path;

use thiserror::Error;

use crate::content::Abstraction;

/// Handle to a node inside a [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// JSON scalar flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Bool,
    Null,
}

/// What a node represents in its source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// HTML document node / form container.
    Root,
    Element,
    Text,
    Comment,
    Doctype,
    /// Form field.
    Field,
    Object,
    Array,
    Scalar(ScalarKind),
}

impl NodeKind {
    /// Kinds a path name test can select.
    pub fn is_named(self) -> bool {
        matches!(
            self,
            NodeKind::Element
                | NodeKind::Field
                | NodeKind::Object
                | NodeKind::Array
                | NodeKind::Scalar(_)
        )
    }

    /// Kinds whose content is a list of child nodes rather than text.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            NodeKind::Root | NodeKind::Element | NodeKind::Object | NodeKind::Array
        )
    }
}

/// Errors raised by document manipulation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("no node matches path `{0}`")]
    PathNotFound(String),

    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("node #{0} does not exist")]
    UnknownNode(usize),

    #[error("the document root cannot be removed")]
    RootRemoval,
}

/// A single arena slot.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    bytes: Option<Vec<u8>>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: Vec::new(),
            text: None,
            bytes: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes in source order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Opaque payload for content that is not valid UTF-8 (binary form parts).
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Parsed, mutable representation of one request or response body.
#[derive(Debug, Clone)]
pub struct Document {
    abstraction: Abstraction,
    nodes: Vec<Node>,
    source: Vec<u8>,
    dirty: bool,
    committed: bool,
}

impl Document {
    /// Create a document whose root node is `root`.
    pub fn new(abstraction: Abstraction, root: Node, source: Vec<u8>) -> Self {
        Self {
            abstraction,
            nodes: vec![root],
            source,
            dirty: false,
            committed: false,
        }
    }

    pub fn abstraction(&self) -> Abstraction {
        self.abstraction
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DocumentError> {
        self.nodes.get_mut(id.0).ok_or(DocumentError::UnknownNode(id.0))
    }

    fn checked(&self, id: NodeId) -> Result<&Node, DocumentError> {
        self.node(id).ok_or(DocumentError::UnknownNode(id.0))
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(Node::kind)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(Node::children).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(Node::parent)
    }

    /// Original bytes the document was parsed from.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// True once any mutation has been applied.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the document ready for serialization.
    ///
    /// Mutations already applied are kept whether or not this is called.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Compare node names the way the document's format does.
    pub fn names_match(&self, a: &str, b: &str) -> bool {
        if self.abstraction.case_insensitive_names() {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    /// Attach a node during parsing. Does not mark the document dirty.
    pub(crate) fn push(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        self.nodes.push(node);
        if let Some(slot) = self.nodes.get_mut(parent.0) {
            slot.children.push(id);
        }
        id
    }

    /// Create and attach a new child node.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
    ) -> Result<NodeId, DocumentError> {
        let parent_kind = self.checked(parent)?.kind;
        let name = if parent_kind == NodeKind::Array {
            self.children(parent).len().to_string()
        } else {
            name.to_string()
        };
        {
            // Appending into a leaf turns it into a container of the same family.
            let slot = self.node_mut(parent)?;
            if !slot.kind.is_container() {
                slot.kind = match slot.kind {
                    NodeKind::Scalar(_) => NodeKind::Object,
                    _ => NodeKind::Element,
                };
                slot.text = None;
                slot.bytes = None;
            }
        }
        let id = self.push(parent, Node::new(kind, name));
        self.mark_dirty();
        Ok(id)
    }

    /// Resolve `parent_path` and append a new node named `name` under the first match.
    pub fn append_child(&mut self, parent_path: &str, name: &str) -> Result<NodeId, DocumentError> {
        let parent = self
            .select_one(parent_path)?
            .ok_or_else(|| DocumentError::PathNotFound(parent_path.to_string()))?;
        self.append_child_to(parent, name)
    }

    /// Append a new node named `name` under `parent`.
    pub fn append_child_to(&mut self, parent: NodeId, name: &str) -> Result<NodeId, DocumentError> {
        let abstraction = self.abstraction;
        abstraction.append_child(self, parent, name)
    }

    /// Detach a node (and its subtree) from its parent.
    pub fn detach(&mut self, id: NodeId) -> Result<(), DocumentError> {
        if id == self.root() {
            return Err(DocumentError::RootRemoval);
        }
        let parent = self.checked(id)?.parent;
        if let Some(parent) = parent {
            let slot = self.node_mut(parent)?;
            slot.children.retain(|child| *child != id);
            if slot.kind == NodeKind::Array {
                let children = slot.children.clone();
                for (index, child) in children.into_iter().enumerate() {
                    self.node_mut(child)?.name = index.to_string();
                }
            }
        }
        self.node_mut(id)?.parent = None;
        self.mark_dirty();
        Ok(())
    }

    /// Remove every node matching `path`. Returns how many subtrees were removed.
    ///
    /// A match nested inside an already removed match is not counted again.
    pub fn remove(&mut self, path: &str) -> Result<usize, DocumentError> {
        let targets = self.select_all(path)?;
        if targets.contains(&self.root()) {
            return Err(DocumentError::RootRemoval);
        }
        let mut removed: Vec<NodeId> = Vec::new();
        for id in targets {
            if self.parent(id).is_none() || self.ancestors(id).any(|a| removed.contains(&a)) {
                continue;
            }
            self.detach(id)?;
            removed.push(id);
        }
        Ok(removed.len())
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?
            .attributes
            .iter()
            .find(|(key, _)| self.names_match(key, name))
            .map(|(_, value)| value.as_str())
    }

    /// Format-aware attribute upsert.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
        let abstraction = self.abstraction;
        abstraction.set_attribute(self, id, name, value)
    }

    /// Plain attribute upsert on the node itself. Existing entries keep their position.
    pub fn put_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
        let name = if self.abstraction.case_insensitive_names() {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        };
        let fold = self.abstraction.case_insensitive_names();
        let slot = self.node_mut(id)?;
        let existing = slot.attributes.iter_mut().find(|(key, _)| {
            if fold {
                key.eq_ignore_ascii_case(&name)
            } else {
                *key == name
            }
        });
        match existing {
            Some((_, current)) if current == value => return Ok(()),
            Some((_, current)) => *current = value.to_string(),
            None => slot.attributes.push((name, value.to_string())),
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool, DocumentError> {
        let fold = self.abstraction.case_insensitive_names();
        let slot = self.node_mut(id)?;
        let before = slot.attributes.len();
        slot.attributes.retain(|(key, _)| {
            if fold {
                !key.eq_ignore_ascii_case(name)
            } else {
                key != name
            }
        });
        let removed = slot.attributes.len() != before;
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Format-aware inner content replacement (markup for HTML, fragments for JSON).
    pub fn set_inner_content(&mut self, id: NodeId, value: &str) -> Result<(), DocumentError> {
        let abstraction = self.abstraction;
        abstraction.set_inner_content(self, id, value)
    }

    /// Replace a node's content with literal text.
    pub fn set_text(&mut self, id: NodeId, value: &str) -> Result<(), DocumentError> {
        self.replace_content(id, value)
    }

    /// Replace a node's content: containers get a single text child,
    /// leaves have their text overwritten.
    pub(crate) fn replace_content(&mut self, id: NodeId, value: &str) -> Result<(), DocumentError> {
        if self.checked(id)?.kind.is_container() {
            self.clear_children(id)?;
            self.push(id, Node::new(NodeKind::Text, "#text").with_text(value));
        } else {
            let slot = self.node_mut(id)?;
            slot.text = Some(value.to_string());
            slot.bytes = None;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Detach every child of `id`.
    pub(crate) fn clear_children(&mut self, id: NodeId) -> Result<(), DocumentError> {
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in children {
            self.node_mut(child)?.parent = None;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Turn a node into a leaf of `kind` carrying `text`, dropping its children.
    pub(crate) fn make_leaf(&mut self, id: NodeId, kind: NodeKind, text: &str) -> Result<(), DocumentError> {
        self.clear_children(id)?;
        let slot = self.node_mut(id)?;
        slot.kind = kind;
        slot.text = Some(text.to_string());
        slot.bytes = None;
        Ok(())
    }

    /// Turn a node into an empty container of `kind`.
    pub(crate) fn make_container(&mut self, id: NodeId, kind: NodeKind) -> Result<(), DocumentError> {
        self.clear_children(id)?;
        let slot = self.node_mut(id)?;
        slot.kind = kind;
        slot.text = None;
        slot.bytes = None;
        Ok(())
    }

    /// Concatenated text of a node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.node(id) {
            if let Some(text) = node.text.as_deref() {
                if !matches!(node.kind, NodeKind::Comment | NodeKind::Doctype) {
                    out.push_str(text);
                }
            }
        }
        for child in self.descendants(id) {
            if let Some(node) = self.node(child) {
                if matches!(node.kind, NodeKind::Text | NodeKind::Field | NodeKind::Scalar(_)) {
                    if let Some(text) = node.text.as_deref() {
                        out.push_str(text);
                    }
                }
            }
        }
        out
    }

    /// Replace `from` with `to` in every attached text-bearing node. Returns the number of nodes changed.
    pub fn replace_text(&mut self, from: &str, to: &str) -> usize {
        if from.is_empty() {
            return 0;
        }
        let mut targets = vec![self.root()];
        targets.extend(self.descendants(self.root()));
        let mut changed = 0;
        for id in targets {
            let Some(node) = self.nodes.get_mut(id.0) else { continue };
            if matches!(node.kind, NodeKind::Comment | NodeKind::Doctype) {
                continue;
            }
            if let Some(text) = node.text.as_mut() {
                if text.contains(from) {
                    *text = text.replace(from, to);
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.mark_dirty();
        }
        changed
    }

    /// Pre-order descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Path expression addressing `id`, e.g. `/html/body/div[2]`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let Some(node) = self.node(current) else { break };
            let (test, same): (String, Vec<NodeId>) = match node.kind {
                NodeKind::Text => (
                    "text()".to_string(),
                    self.children(parent)
                        .iter()
                        .copied()
                        .filter(|c| self.kind(*c) == Some(NodeKind::Text))
                        .collect(),
                ),
                _ => (
                    node.name.clone(),
                    self.children(parent)
                        .iter()
                        .copied()
                        .filter(|c| {
                            self.node(*c)
                                .map(|n| n.kind.is_named() && self.names_match(&n.name, &node.name))
                                .unwrap_or(false)
                        })
                        .collect(),
                ),
            };
            if same.len() > 1 {
                let position = same.iter().position(|c| *c == current).unwrap_or(0) + 1;
                segments.push(format!("{test}[{position}]"));
            } else {
                segments.push(test);
            }
            current = parent;
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Every node matching `path`, in document order. A non-match is an empty list.
    pub fn select_all(&self, path: &str) -> Result<Vec<NodeId>, DocumentError> {
        Ok(Path::parse(path)?.resolve(self))
    }

    /// First node matching `path`.
    pub fn select_one(&self, path: &str) -> Result<Option<NodeId>, DocumentError> {
        Ok(self.select_all(path)?.into_iter().next())
    }

    /// Value of the trailing `@attr` step of `path` on its first match.
    pub fn select_attribute(&self, path: &str) -> Result<Option<String>, DocumentError> {
        let parsed = Path::parse(path)?;
        let Some(name) = parsed.attribute() else {
            return Ok(None);
        };
        Ok(parsed
            .resolve(self)
            .into_iter()
            .next()
            .and_then(|id| self.attribute(id, name).map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new(Abstraction::Html, Node::new(NodeKind::Root, "#document"), Vec::new());
        let root = doc.root();
        let html = doc.push(root, Node::new(NodeKind::Element, "html"));
        let body = doc.push(html, Node::new(NodeKind::Element, "body"));
        doc.push(body, Node::new(NodeKind::Element, "p").with_text("ignored"));
        let p = doc.push(body, Node::new(NodeKind::Element, "p"));
        doc.push(p, Node::new(NodeKind::Text, "#text").with_text("hello"));
        doc
    }

    #[test]
    fn test_append_child_marks_dirty() {
        let mut doc = sample();
        assert!(!doc.is_dirty());

        let div = doc.append_child("/html/body", "div").unwrap();
        assert!(doc.is_dirty());
        assert_eq!(doc.path_of(div), "/html/body/div");
        assert_eq!(doc.children(doc.parent(div).unwrap()).last(), Some(&div));
    }

    #[test]
    fn test_append_child_missing_parent() {
        let mut doc = sample();
        let err = doc.append_child("/html/body/footer", "div").unwrap_err();
        assert_eq!(err, DocumentError::PathNotFound("/html/body/footer".into()));
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_set_attribute_is_idempotent_upsert() {
        let mut doc = sample();
        let body = doc.select_one("/html/body").unwrap().unwrap();
        doc.set_attribute(body, "Class", "a").unwrap();
        doc.set_attribute(body, "class", "b").unwrap();
        doc.set_attribute(body, "id", "main").unwrap();

        let attrs = doc.node(body).unwrap().attributes();
        assert_eq!(attrs, &[("class".to_string(), "b".to_string()), ("id".to_string(), "main".to_string())]);
    }

    #[test]
    fn test_path_of_uses_positions_for_siblings() {
        let doc = sample();
        let second = doc.select_all("/html/body/p").unwrap()[1];
        assert_eq!(doc.path_of(second), "/html/body/p[2]");
        assert_eq!(doc.path_of(doc.root()), "/");
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let mut doc = sample();
        assert_eq!(doc.remove("/html/body/p").unwrap(), 2);
        assert!(doc.select_all("//p").unwrap().is_empty());
        assert_eq!(doc.remove("/").unwrap_err(), DocumentError::RootRemoval);
    }

    #[test]
    fn test_remove_nested_matches_counts_outer_subtree_once() {
        let mut doc = sample();
        let body = doc.select_one("/html/body").unwrap().unwrap();
        let outer = doc.push(body, Node::new(NodeKind::Element, "div"));
        let inner = doc.push(outer, Node::new(NodeKind::Element, "div"));
        doc.push(inner, Node::new(NodeKind::Element, "div"));

        assert_eq!(doc.remove("//div").unwrap(), 1);
        assert!(doc.select_all("//div").unwrap().is_empty());
        assert_eq!(doc.parent(inner), Some(outer));
    }

    #[test]
    fn test_text_content_and_replace() {
        let mut doc = sample();
        let p = doc.select_one("/html/body/p[2]").unwrap().unwrap();
        assert_eq!(doc.text_content(p), "hello");

        assert_eq!(doc.replace_text("hello", "bye"), 1);
        assert_eq!(doc.text_content(p), "bye");
        assert_eq!(doc.replace_text("missing", "x"), 0);
    }

    #[test]
    fn test_mutation_visible_to_later_lookup() {
        let mut doc = sample();
        let div = doc.append_child("/html/body", "div").unwrap();
        doc.set_attribute(div, "id", "x").unwrap();

        let again = doc.select_one("/html/body/div[@id='x']").unwrap();
        assert_eq!(again, Some(div));
    }
}
