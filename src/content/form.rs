//! Form abstraction: `application/x-www-form-urlencoded` and `multipart/form-data`.
//!
//! Both encodings map to a flat document: the root holds one `Field` node per
//! submitted value, in submission order, addressed by field name (`/email`,
//! `/tag[2]`). Multipart part metadata (`filename`, `content-type`) is kept as
//! field attributes; parts that are not UTF-8 keep their payload as opaque bytes.

use url::form_urlencoded;

use crate::content::{Abstraction, MediaType, ParseFailure};
use crate::document::{Document, Node, NodeKind};

const MULTIPART: &str = "multipart/form-data";
const ROOT_NAME: &str = "#form";
const BOUNDARY_ATTR: &str = "boundary";

pub fn parse(body: &[u8], media_type: &MediaType) -> Result<Document, ParseFailure> {
    if media_type.essence() == MULTIPART {
        let boundary = media_type
            .param("boundary")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ParseFailure::new(Abstraction::Form, "multipart body without boundary"))?;
        parse_multipart(body, boundary)
    } else {
        parse_urlencoded(body)
    }
}

fn parse_urlencoded(body: &[u8]) -> Result<Document, ParseFailure> {
    std::str::from_utf8(body)
        .map_err(|e| ParseFailure::new(Abstraction::Form, format!("invalid UTF-8: {e}")))?;

    let mut document = Document::new(Abstraction::Form, Node::new(NodeKind::Root, ROOT_NAME), body.to_vec());
    let root = document.root();
    for (name, value) in form_urlencoded::parse(body) {
        document.push(root, Node::new(NodeKind::Field, name.into_owned()).with_text(value.into_owned()));
    }
    Ok(document)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Result<Document, ParseFailure> {
    let fail = |reason: &str| ParseFailure::new(Abstraction::Form, reason);
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let next_delimiter = [b"\r\n".as_slice(), delimiter].concat();

    let mut document = Document::new(
        Abstraction::Form,
        Node::new(NodeKind::Root, ROOT_NAME).with_attribute(BOUNDARY_ATTR, boundary),
        body.to_vec(),
    );
    let root = document.root();

    let start = find(body, delimiter).ok_or_else(|| fail("opening boundary not found"))?;
    let mut cursor = start + delimiter.len();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            break;
        }
        let rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| fail("boundary not followed by CRLF"))?;
        let header_end = find(rest, b"\r\n\r\n").ok_or_else(|| fail("part headers not terminated"))?;
        let headers = std::str::from_utf8(&rest[..header_end]).map_err(|_| fail("part headers are not UTF-8"))?;
        let content = &rest[header_end + 4..];
        let content_end = find(content, &next_delimiter).ok_or_else(|| fail("closing boundary not found"))?;
        let payload = &content[..content_end];

        let mut node = part_node(headers).ok_or_else(|| fail("part without form-data name"))?;
        node = match std::str::from_utf8(payload) {
            Ok(text) => node.with_text(text),
            Err(_) => node.with_bytes(payload.to_vec()),
        };
        document.push(root, node);

        let consumed = body.len() - content.len() + content_end + next_delimiter.len();
        cursor = consumed;
    }

    Ok(document)
}

/// Build a field node from a part's header block.
fn part_node(headers: &str) -> Option<Node> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.split_once('=') else { continue };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => name = Some(v),
                    "filename" => filename = Some(v),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let mut node = Node::new(NodeKind::Field, name?);
    if let Some(filename) = filename {
        node = node.with_attribute("filename", filename);
    }
    if let Some(content_type) = content_type {
        node = node.with_attribute("content-type", content_type);
    }
    Some(node)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

pub fn serialize(document: &Document) -> Vec<u8> {
    let root = document.root();
    match document.attribute(root, BOUNDARY_ATTR) {
        Some(boundary) => serialize_multipart(document, boundary),
        None => serialize_urlencoded(document),
    }
}

fn fields(document: &Document) -> impl Iterator<Item = &Node> {
    document
        .children(document.root())
        .iter()
        .filter_map(|id| document.node(*id))
        .filter(|node| node.kind() == NodeKind::Field)
}

fn serialize_urlencoded(document: &Document) -> Vec<u8> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for field in fields(document) {
        serializer.append_pair(field.name(), field.text().unwrap_or_default());
    }
    serializer.finish().into_bytes()
}

fn serialize_multipart(document: &Document, boundary: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(document.source().len() + 128);
    for field in fields(document) {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", field.name());
        let mut content_type = None;
        for (key, value) in field.attributes() {
            match key.as_str() {
                "filename" => disposition.push_str(&format!("; filename=\"{value}\"")),
                "content-type" => content_type = Some(value),
                _ => {}
            }
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        match (field.text(), field.bytes()) {
            (Some(text), _) => out.extend_from_slice(text.as_bytes()),
            (None, Some(bytes)) => out.extend_from_slice(bytes),
            (None, None) => {}
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}
