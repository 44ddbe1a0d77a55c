//! Content abstractions: format-specific adapters between body bytes and [`Document`].
//!
//! # Data Flow
//! ```text
//! Content-Type header
//!     → MediaType::parse (normalize essence, keep parameters)
//!     → registry.rs (essence → Abstraction)
//!     → Abstraction::parse   (html.rs | form.rs | json.rs | script.rs)
//!     → ... modifiers ...
//!     → Abstraction::serialize
//! ```
//!
//! # Design Decisions
//! - Closed set of abstractions selected by explicit registry lookup
//! - Parsing never panics; malformed input is a `ParseFailure` and the caller
//!   passes the original bytes through
//! - Serializing an untouched document returns its source bytes

pub mod form;
pub mod html;
pub mod json;
pub mod registry;
pub mod script;

pub use registry::ContentRegistry;

use std::fmt;

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Document, DocumentError, NodeId, NodeKind, ScalarKind};

/// The content families the proxy knows how to modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Abstraction {
    Html,
    Form,
    Json,
    #[serde(alias = "script", alias = "js")]
    JavaScript,
}

/// Body did not match its claimed content type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{abstraction} body could not be parsed: {reason}")]
pub struct ParseFailure {
    pub abstraction: Abstraction,
    pub reason: String,
}

impl ParseFailure {
    pub fn new(abstraction: Abstraction, reason: impl Into<String>) -> Self {
        Self {
            abstraction,
            reason: reason.into(),
        }
    }
}

impl Abstraction {
    pub fn as_str(self) -> &'static str {
        match self {
            Abstraction::Html => "html",
            Abstraction::Form => "form",
            Abstraction::Json => "json",
            Abstraction::JavaScript => "javascript",
        }
    }

    pub fn parse(self, body: &[u8], media_type: &MediaType) -> Result<Document, ParseFailure> {
        match self {
            Abstraction::Html => html::parse(body),
            Abstraction::Form => form::parse(body, media_type),
            Abstraction::Json => json::parse(body),
            Abstraction::JavaScript => script::parse(body),
        }
    }

    pub fn serialize(self, document: &Document) -> Vec<u8> {
        if !document.is_dirty() {
            return document.source().to_vec();
        }
        match self {
            Abstraction::Html => html::serialize(document),
            Abstraction::Form => form::serialize(document),
            Abstraction::Json => json::serialize(document),
            Abstraction::JavaScript => script::serialize(document),
        }
    }

    /// HTML tag and attribute names compare case-insensitively.
    pub fn case_insensitive_names(self) -> bool {
        self == Abstraction::Html
    }

    /// Kind of node created by `append_child` under a parent of `parent` kind.
    pub fn child_kind(self, parent: NodeKind) -> NodeKind {
        match self {
            Abstraction::Html => NodeKind::Element,
            Abstraction::Form => NodeKind::Field,
            Abstraction::Json => match parent {
                NodeKind::Array | NodeKind::Object | NodeKind::Scalar(_) => NodeKind::Scalar(ScalarKind::Null),
                _ => NodeKind::Object,
            },
            Abstraction::JavaScript => NodeKind::Text,
        }
    }

    /// Append a node named `name` under `parent`.
    pub fn append_child(self, document: &mut Document, parent: NodeId, name: &str) -> Result<NodeId, DocumentError> {
        let parent_kind = document.kind(parent).ok_or(DocumentError::UnknownNode(parent.index()))?;
        if self == Abstraction::Json && parent_kind == NodeKind::Object {
            return json::append_member(document, parent, name);
        }
        document.create_child(parent, self.child_kind(parent_kind), name)
    }

    pub fn set_inner_content(self, document: &mut Document, id: NodeId, value: &str) -> Result<(), DocumentError> {
        match self {
            Abstraction::Html => html::set_inner_content(document, id, value),
            Abstraction::Json => json::set_inner_content(document, id, value),
            Abstraction::Form | Abstraction::JavaScript => document.replace_content(id, value),
        }
    }

    pub fn set_attribute(self, document: &mut Document, id: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
        match self {
            Abstraction::Json => json::set_member(document, id, name, value),
            _ => document.put_attribute(id, name, value),
        }
    }
}

impl fmt::Display for Abstraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    /// Parse a raw header value. Returns `None` when no type remains after normalization.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let essence = normalize_mime(parts.next().unwrap_or_default());
        if essence.is_empty() {
            return None;
        }
        let params = parts
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                let key = strip_invisible(key).to_ascii_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                (!key.is_empty()).then_some((key, value))
            })
            .collect();
        Some(Self { essence, params })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(Self::parse)
    }

    /// Normalized `type/subtype`.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Lowercase, drop parameters, whitespace and invisible formatting characters.
pub fn normalize_mime(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or_default();
    strip_invisible(essence).to_ascii_lowercase()
}

fn strip_invisible(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !is_invisible(*c))
        .collect()
}

/// Zero-width and bidi formatting characters that sneak into copied MIME lists.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
    )
}
