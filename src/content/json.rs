//! JSON abstraction.
//!
//! The root node is the top-level value itself. Object members are children
//! named by key, array items are children named by index (`/items/0`).

use serde_json::{Map, Number, Value};

use crate::content::{Abstraction, ParseFailure};
use crate::document::{Document, DocumentError, Node, NodeId, NodeKind, ScalarKind};

pub fn parse(body: &[u8]) -> Result<Document, ParseFailure> {
    let value: Value = serde_json::from_slice(body).map_err(|e| ParseFailure::new(Abstraction::Json, e.to_string()))?;
    let mut document = Document::new(Abstraction::Json, shell("", &value), body.to_vec());
    let root = document.root();
    fill(&mut document, root, &value);
    Ok(document)
}

/// Node for `value` without its children.
fn shell(name: &str, value: &Value) -> Node {
    match value {
        Value::Object(_) => Node::new(NodeKind::Object, name),
        Value::Array(_) => Node::new(NodeKind::Array, name),
        Value::String(s) => Node::new(NodeKind::Scalar(ScalarKind::String), name).with_text(s.as_str()),
        Value::Number(n) => Node::new(NodeKind::Scalar(ScalarKind::Number), name).with_text(n.to_string()),
        Value::Bool(b) => Node::new(NodeKind::Scalar(ScalarKind::Bool), name).with_text(b.to_string()),
        Value::Null => Node::new(NodeKind::Scalar(ScalarKind::Null), name).with_text("null"),
    }
}

fn fill(document: &mut Document, id: NodeId, value: &Value) {
    match value {
        Value::Object(members) => {
            for (key, member) in members {
                let child = document.push(id, shell(key, member));
                fill(document, child, member);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let child = document.push(id, shell(&index.to_string(), item));
                fill(document, child, item);
            }
        }
        _ => {}
    }
}

pub fn serialize(document: &Document) -> Vec<u8> {
    let value = to_value(document, document.root());
    serde_json::to_vec(&value).unwrap_or_else(|_| document.source().to_vec())
}

fn to_value(document: &Document, id: NodeId) -> Value {
    let Some(node) = document.node(id) else {
        return Value::Null;
    };
    let text = node.text().unwrap_or_default();
    match node.kind() {
        NodeKind::Object | NodeKind::Root | NodeKind::Element => {
            let mut members = Map::new();
            for child in node.children() {
                if let Some(child_node) = document.node(*child) {
                    members.insert(child_node.name().to_string(), to_value(document, *child));
                }
            }
            Value::Object(members)
        }
        NodeKind::Array => Value::Array(node.children().iter().map(|child| to_value(document, *child)).collect()),
        NodeKind::Scalar(ScalarKind::Number) => match text.parse::<Number>() {
            Ok(number) => Value::Number(number),
            Err(_) => Value::String(text.to_string()),
        },
        NodeKind::Scalar(ScalarKind::Bool) => Value::Bool(text.trim() == "true"),
        NodeKind::Scalar(ScalarKind::Null) if node.text().is_none() || text == "null" => Value::Null,
        _ => Value::String(text.to_string()),
    }
}

/// Replace a node with the JSON fragment in `value`, or with a string when it is not JSON.
pub fn set_inner_content(document: &mut Document, id: NodeId, value: &str) -> Result<(), DocumentError> {
    match serde_json::from_str::<Value>(value) {
        Ok(fragment) => graft(document, id, &fragment),
        Err(_) => document.make_leaf(id, NodeKind::Scalar(ScalarKind::String), value),
    }
}

fn graft(document: &mut Document, id: NodeId, value: &Value) -> Result<(), DocumentError> {
    match value {
        Value::Object(members) => {
            document.make_container(id, NodeKind::Object)?;
            for (key, member) in members {
                let child = document.create_child(id, NodeKind::Scalar(ScalarKind::Null), key)?;
                graft(document, child, member)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            document.make_container(id, NodeKind::Array)?;
            for item in items {
                let child = document.create_child(id, NodeKind::Scalar(ScalarKind::Null), "")?;
                graft(document, child, item)?;
            }
            Ok(())
        }
        Value::String(s) => document.make_leaf(id, NodeKind::Scalar(ScalarKind::String), s),
        Value::Number(n) => document.make_leaf(id, NodeKind::Scalar(ScalarKind::Number), &n.to_string()),
        Value::Bool(b) => document.make_leaf(id, NodeKind::Scalar(ScalarKind::Bool), &b.to_string()),
        Value::Null => document.make_leaf(id, NodeKind::Scalar(ScalarKind::Null), "null"),
    }
}

fn member(document: &Document, id: NodeId, name: &str) -> Option<NodeId> {
    document.children(id).iter().copied().find(|child| {
        document
            .node(*child)
            .map(|node| node.name() == name)
            .unwrap_or(false)
    })
}

/// Append member `name` to an object. Keys are unique, so an existing member
/// of that name is reset to `null` in place and returned.
pub fn append_member(document: &mut Document, id: NodeId, name: &str) -> Result<NodeId, DocumentError> {
    match member(document, id, name) {
        Some(child) => {
            document.make_leaf(child, NodeKind::Scalar(ScalarKind::Null), "null")?;
            Ok(child)
        }
        None => document.create_child(id, NodeKind::Scalar(ScalarKind::Null), name),
    }
}

/// Upsert a string member `name` on an object node. Non-objects become objects.
pub fn set_member(document: &mut Document, id: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
    if let Some(child) = member(document, id, name) {
        let unchanged = document
            .node(child)
            .map(|node| node.kind() == NodeKind::Scalar(ScalarKind::String) && node.text() == Some(value))
            .unwrap_or(false);
        if unchanged {
            return Ok(());
        }
        return document.make_leaf(child, NodeKind::Scalar(ScalarKind::String), value);
    }
    if document.kind(id) != Some(NodeKind::Object) {
        document.make_container(id, NodeKind::Object)?;
    }
    let child = document.create_child(id, NodeKind::Scalar(ScalarKind::String), name)?;
    document.make_leaf(child, NodeKind::Scalar(ScalarKind::String), value)
}
