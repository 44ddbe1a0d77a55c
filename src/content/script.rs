//! Script-text abstraction for JavaScript-like content types.
//!
//! There is no grammar here: the root holds a single text node with the whole
//! body, so modifiers work at the text level (`replace_text`, `set_inner_content`
//! on `/`, or appending extra text nodes that serialize in order).

use crate::content::{Abstraction, ParseFailure};
use crate::document::{Document, Node, NodeKind};

pub fn parse(body: &[u8]) -> Result<Document, ParseFailure> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ParseFailure::new(Abstraction::JavaScript, format!("invalid UTF-8: {e}")))?;

    let mut document = Document::new(
        Abstraction::JavaScript,
        Node::new(NodeKind::Root, "#script"),
        body.to_vec(),
    );
    let root = document.root();
    document.push(root, Node::new(NodeKind::Text, "#text").with_text(text));
    Ok(document)
}

pub fn serialize(document: &Document) -> Vec<u8> {
    document.text_content(document.root()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_level_mutation() {
        let mut document = parse(b"var api = 'https://origin.local/api';").unwrap();
        assert_eq!(document.replace_text("origin.local", "proxy.local"), 1);
        let extra = document.append_child("/", "ignored").unwrap();
        document.set_inner_content(extra, "\nconsole.log('patched');").unwrap();

        let out = String::from_utf8(Abstraction::JavaScript.serialize(&document)).unwrap();
        assert_eq!(out, "var api = 'https://proxy.local/api';\nconsole.log('patched');");
    }

    #[test]
    fn test_replace_whole_body() {
        let mut document = parse(b"old();").unwrap();
        let root = document.root();
        document.set_inner_content(root, "fresh();").unwrap();
        assert_eq!(Abstraction::JavaScript.serialize(&document), b"fresh();".to_vec());
    }

    #[test]
    fn test_round_trip_and_failure() {
        let document = parse(b"let x = 1;\r\n").unwrap();
        assert_eq!(Abstraction::JavaScript.serialize(&document), b"let x = 1;\r\n".to_vec());
        assert!(parse(b"\xc3\x28").is_err());
    }
}
