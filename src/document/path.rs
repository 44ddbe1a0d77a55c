//! Structural path expressions.
//!
//! A small XPath-like subset:
//!
//! ```text
//! /                       the root node
//! /html/body/div          child steps
//! //a                     any descendant named `a`
//! //li[1]                 every `li` that is first among its siblings
//! /items/*                any named child
//! /p/text()               text children
//! /ul/li[2]               1-based position among matches
//! /div[@id]               elements carrying an attribute
//! /div[@id='main']        attribute equality (single or double quotes)
//! /a/@href                trailing attribute step
//! ```
//!
//! Resolution never fails on a non-match; only malformed expressions error.

use std::collections::HashSet;
use std::str::FromStr;

use crate::document::{Document, DocumentError, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Text,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    HasAttribute(String),
    AttributeEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    steps: Vec<Step>,
    attribute: Option<String>,
}

impl Path {
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let fail = |reason: &str| DocumentError::InvalidPath {
            path: input.to_string(),
            reason: reason.to_string(),
        };

        let text = input.trim();
        if text.is_empty() {
            return Err(fail("empty path"));
        }
        if text == "/" {
            return Ok(Self { steps: Vec::new(), attribute: None });
        }

        let mut steps = Vec::new();
        let mut attribute = None;
        let mut rest = text;
        let mut first = true;

        while !rest.is_empty() {
            let axis = if let Some(tail) = rest.strip_prefix("//") {
                rest = tail;
                Axis::Descendant
            } else if let Some(tail) = rest.strip_prefix('/') {
                rest = tail;
                Axis::Child
            } else if first {
                Axis::Child
            } else {
                return Err(fail("expected `/` between steps"));
            };
            first = false;

            if let Some(name) = rest.strip_prefix('@') {
                if axis == Axis::Descendant || name.is_empty() || name.contains(['/', '[', ']']) {
                    return Err(fail("attribute step must be a final `/@name`"));
                }
                attribute = Some(name.to_string());
                break;
            }

            let end = rest.find(['/', '[']).unwrap_or(rest.len());
            let name = rest[..end].trim();
            if name.is_empty() {
                return Err(fail("empty step"));
            }
            rest = &rest[end..];

            let test = match name {
                "*" => NameTest::Any,
                "text()" => NameTest::Text,
                other => NameTest::Name(other.to_string()),
            };

            let mut predicates = Vec::new();
            while rest.starts_with('[') {
                let close = closing_bracket(rest).ok_or_else(|| fail("unterminated predicate"))?;
                predicates.push(parse_predicate(&rest[1..close]).map_err(|reason| fail(&reason))?);
                rest = &rest[close + 1..];
            }

            steps.push(Step { axis, test, predicates });
        }

        if steps.is_empty() && attribute.is_some() {
            return Err(fail("attribute step needs an element step before it"));
        }

        Ok(Self { steps, attribute })
    }

    /// Trailing `@name` step, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Resolve against `doc`, returning matches in document order without duplicates.
    pub fn resolve(&self, doc: &Document) -> Vec<NodeId> {
        let mut current = vec![doc.root()];

        for step in &self.steps {
            let mut next = Vec::new();
            let mut seen = HashSet::new();

            for context in &current {
                let candidates = match step.axis {
                    Axis::Child => doc.children(*context).to_vec(),
                    Axis::Descendant => doc.descendants(*context),
                };
                let matched: Vec<NodeId> = candidates
                    .into_iter()
                    .filter(|id| step.test.matches(doc, *id))
                    .collect();
                let matched = match step.axis {
                    Axis::Child => step.filter(doc, matched),
                    Axis::Descendant => step.filter_per_parent(doc, matched),
                };

                for id in matched {
                    if seen.insert(id) {
                        next.push(id);
                    }
                }
            }

            current = next;
            if current.is_empty() {
                break;
            }
        }

        if let Some(name) = &self.attribute {
            current.retain(|id| doc.attribute(*id, name).is_some());
        }
        current
    }
}

impl FromStr for Path {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Step {
    fn filter(&self, doc: &Document, mut matched: Vec<NodeId>) -> Vec<NodeId> {
        for predicate in &self.predicates {
            matched = predicate.apply(doc, matched);
        }
        matched
    }

    /// Predicates on a descendant step see each parent's matches separately,
    /// so `//li[1]` is every `li` that is first among its siblings.
    fn filter_per_parent(&self, doc: &Document, matched: Vec<NodeId>) -> Vec<NodeId> {
        if self.predicates.is_empty() {
            return matched;
        }
        let mut groups: Vec<(Option<NodeId>, Vec<NodeId>)> = Vec::new();
        for id in &matched {
            let parent = doc.parent(*id);
            match groups.iter_mut().find(|(p, _)| *p == parent) {
                Some((_, group)) => group.push(*id),
                None => groups.push((parent, vec![*id])),
            }
        }
        let kept: HashSet<NodeId> = groups
            .into_iter()
            .flat_map(|(_, group)| self.filter(doc, group))
            .collect();
        matched.into_iter().filter(|id| kept.contains(id)).collect()
    }
}

impl NameTest {
    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(node) = doc.node(id) else {
            return false;
        };
        match self {
            NameTest::Any => node.kind().is_named(),
            NameTest::Text => node.kind() == NodeKind::Text,
            NameTest::Name(name) => node.kind().is_named() && doc.names_match(node.name(), name),
        }
    }
}

impl Predicate {
    fn apply(&self, doc: &Document, matched: Vec<NodeId>) -> Vec<NodeId> {
        match self {
            Predicate::Position(position) => matched.get(position - 1).copied().into_iter().collect(),
            Predicate::HasAttribute(name) => matched
                .into_iter()
                .filter(|id| doc.attribute(*id, name).is_some())
                .collect(),
            Predicate::AttributeEquals(name, value) => matched
                .into_iter()
                .filter(|id| doc.attribute(*id, name) == Some(value.as_str()))
                .collect(),
        }
    }
}

/// Index of the `]` closing the predicate that starts at `input[0]`, skipping quoted text.
fn closing_bracket(input: &str) -> Option<usize> {
    let mut quote = None;
    for (index, c) in input.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(index),
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str) -> Result<Predicate, String> {
    let body = body.trim();
    if body.is_empty() {
        return Err("empty predicate".into());
    }

    if let Some(attr) = body.strip_prefix('@') {
        return match attr.split_once('=') {
            None => {
                let name = attr.trim();
                if name.is_empty() {
                    return Err("missing attribute name".into());
                }
                Ok(Predicate::HasAttribute(name.to_string()))
            }
            Some((name, value)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err("missing attribute name".into());
                }
                Ok(Predicate::AttributeEquals(name.to_string(), unquote(value.trim())?))
            }
        };
    }

    match body.parse::<usize>() {
        Ok(0) => Err("positions start at 1".into()),
        Ok(position) => Ok(Predicate::Position(position)),
        Err(_) => Err(format!("unsupported predicate `{body}`")),
    }
}

fn unquote(value: &str) -> Result<String, String> {
    for quote in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(quote) {
            return inner
                .strip_suffix(quote)
                .map(str::to_string)
                .ok_or_else(|| "unterminated string".to_string());
        }
    }
    Ok(value.to_string())
}
