//! HTML abstraction.
//!
//! Parsing goes through html5ever into an `RcDom`, which is then copied into the
//! document arena. The arena (not the rcdom) is the single source of truth once
//! modifiers have run, so serialization walks the arena through html5ever's
//! `Serialize` trait. Markup handed to `set_inner_content` is parsed as a
//! fragment and copied in the same way, so later path lookups can see it.

use std::io;

use html5ever::interface::QualName;
use html5ever::serialize::{serialize as write_html, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns, parse_document, parse_fragment, LocalName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::content::{Abstraction, ParseFailure};
use crate::document::{Document, DocumentError, Node, NodeId, NodeKind};

pub fn parse(body: &[u8]) -> Result<Document, ParseFailure> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ParseFailure::new(Abstraction::Html, format!("invalid UTF-8: {e}")))?;

    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut text.as_bytes())
        .map_err(|e| ParseFailure::new(Abstraction::Html, e.to_string()))?;

    let mut document = Document::new(
        Abstraction::Html,
        Node::new(NodeKind::Root, "#document"),
        body.to_vec(),
    );
    let root = document.root();
    for child in dom.document.children.borrow().iter() {
        copy_node(&mut document, root, child);
    }
    Ok(document)
}

/// Replace the children of `id` with the nodes parsed from `markup`.
///
/// The fragment is parsed in the context of the target element, so `<tr>`
/// markup set on a `<tbody>` stays a row.
pub fn set_inner_content(document: &mut Document, id: NodeId, markup: &str) -> Result<(), DocumentError> {
    let node = document.node(id).ok_or(DocumentError::UnknownNode(id.index()))?;
    let context = match node.kind() {
        NodeKind::Element => node.name().to_ascii_lowercase(),
        NodeKind::Root => "body".to_string(),
        _ => return document.replace_content(id, markup),
    };

    let dom = parse_fragment(
        RcDom::default(),
        Default::default(),
        QualName::new(None, ns!(html), LocalName::from(context)),
        Vec::new(),
    )
    .one(markup);

    document.clear_children(id)?;
    // The fragment parser wraps its output in a synthetic <html> element.
    for wrapper in dom.document.children.borrow().iter() {
        for child in wrapper.children.borrow().iter() {
            copy_node(document, id, child);
        }
    }
    Ok(())
}

fn copy_node(document: &mut Document, parent: NodeId, handle: &Handle) {
    match &handle.data {
        NodeData::Document => {
            for child in handle.children.borrow().iter() {
                copy_node(document, parent, child);
            }
        }
        NodeData::Doctype { name, .. } => {
            document.push(parent, Node::new(NodeKind::Doctype, "#doctype").with_text(name.to_string()));
        }
        NodeData::Text { contents } => {
            document.push(parent, Node::new(NodeKind::Text, "#text").with_text(contents.borrow().to_string()));
        }
        NodeData::Comment { contents } => {
            document.push(parent, Node::new(NodeKind::Comment, "#comment").with_text(contents.to_string()));
        }
        // The HTML tokenizer reports `<?...>` as a bogus comment; this never comes out of html5ever.
        NodeData::ProcessingInstruction { .. } => {}
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let mut node = Node::new(NodeKind::Element, name.local.to_string());
            for attr in attrs.borrow().iter() {
                let key = match &attr.name.prefix {
                    Some(prefix) => format!("{}:{}", prefix, attr.name.local),
                    None => attr.name.local.to_string(),
                };
                node = node.with_attribute(key, attr.value.to_string());
            }
            let id = document.push(parent, node);
            for child in handle.children.borrow().iter() {
                copy_node(document, id, child);
            }
            if let Some(contents) = template_contents.borrow().as_ref() {
                for child in contents.children.borrow().iter() {
                    copy_node(document, id, child);
                }
            }
        }
    }
}

/// Borrowed view of an arena subtree that html5ever can serialize.
struct ArenaNode<'a> {
    document: &'a Document,
    id: NodeId,
}

impl ArenaNode<'_> {
    fn write<S: Serializer>(&self, id: NodeId, serializer: &mut S) -> io::Result<()> {
        let Some(node) = self.document.node(id) else {
            return Ok(());
        };
        let text = node.text().unwrap_or_default();
        match node.kind() {
            NodeKind::Doctype => serializer.write_doctype(text),
            NodeKind::Comment => serializer.write_comment(text),
            NodeKind::Text | NodeKind::Field | NodeKind::Scalar(_) => serializer.write_text(text),
            NodeKind::Root => self.write_children(id, serializer),
            NodeKind::Element | NodeKind::Object | NodeKind::Array => {
                let name = QualName::new(None, ns!(html), LocalName::from(node.name()));
                let attributes: Vec<(QualName, &str)> = node
                    .attributes()
                    .iter()
                    .map(|(key, value)| (QualName::new(None, ns!(), LocalName::from(key.as_str())), value.as_str()))
                    .collect();
                serializer.start_elem(name.clone(), attributes.iter().map(|(key, value)| (key, *value)))?;
                if let Some(text) = node.text() {
                    serializer.write_text(text)?;
                }
                self.write_children(id, serializer)?;
                serializer.end_elem(name)
            }
        }
    }

    fn write_children<S: Serializer>(&self, id: NodeId, serializer: &mut S) -> io::Result<()> {
        for child in self.document.children(id) {
            self.write(*child, serializer)?;
        }
        Ok(())
    }
}

impl Serialize for ArenaNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: &mut S, traversal_scope: TraversalScope) -> io::Result<()> {
        match traversal_scope {
            TraversalScope::IncludeNode => self.write(self.id, serializer),
            TraversalScope::ChildrenOnly(_) => self.write_children(self.id, serializer),
        }
    }
}

pub fn serialize(document: &Document) -> Vec<u8> {
    let mut out = Vec::with_capacity(document.source().len() + 64);
    let root = ArenaNode {
        document,
        id: document.root(),
    };
    if let Err(e) = write_html(&mut out, &root, SerializeOpts::default()) {
        tracing::warn!(error = %e, "HTML serialization failed");
    }
    out
}
