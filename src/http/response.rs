//! Response handling and transformation.
//!
//! # Responsibilities
//! - Prepare downstream response headers for the client
//! - Rewrite `Location`/`Content-Location` back to the serving origin
//! - Describe a replaced body (length, encoding, validators)
//!
//! # Design Decisions
//! - Hop-by-hop headers stripped automatically
//! - A rewritten body loses its strong validators (`ETag`, `Content-MD5`)

use axum::http::{header, HeaderMap, HeaderValue};

use crate::http::compression::Encoding;
use crate::http::request::strip_hop_by_hop;
use crate::routing::HostMapping;

/// Headers sent to the client for a downstream response.
pub fn prepare_client_headers(headers: &HeaderMap, mapping: &HostMapping) -> HeaderMap {
    let mut out = headers.clone();
    strip_hop_by_hop(&mut out);

    for name in [header::LOCATION, header::CONTENT_LOCATION] {
        let rewritten = out
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(|v| mapping.to_serving(v).into_owned());
        if let Some(value) = rewritten.and_then(|v| HeaderValue::from_str(&v).ok()) {
            out.insert(name, value);
        }
    }
    out
}

/// Update headers for a body that was re-encoded or rewritten.
pub fn describe_body(headers: &mut HeaderMap, len: usize, encoding: Encoding, modified: bool) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    match encoding {
        Encoding::Identity => {
            headers.remove(header::CONTENT_ENCODING);
        }
        other => {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(other.as_str()));
        }
    }
    if modified {
        headers.remove(header::ETAG);
        headers.remove("content-md5");
    }
}

/// Mark the response as varying by `Accept-Encoding`.
pub fn vary_on_accept_encoding(headers: &mut HeaderMap) {
    let already = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| {
            let v = v.trim();
            v == "*" || v.eq_ignore_ascii_case("accept-encoding")
        });
    if !already {
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
    }
}
