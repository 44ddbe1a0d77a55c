//! Request handling and transformation.
//!
//! # Responsibilities
//! - Request ID header name, layers and span construction
//! - Prepare inbound headers for forwarding downstream
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing, and sent downstream
//! - Hop-by-hop headers (and those named in `Connection`) never cross the proxy
//! - Internal cookies are removed, the rest of the `Cookie` header is kept verbatim

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

use crate::http::compression::Encoding;
use crate::routing::HostMapping;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Access to the request ID assigned by the request-id layer.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers().request_id()
    }
}

/// Assigns a UUID v4 `x-request-id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Span for one exchange, used by the trace layer.
pub fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        request_id = %request.request_id(),
        method = %request.method(),
        uri = %request.uri(),
    )
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Remove the named cookies from every `Cookie` header. Empty headers are dropped.
pub fn strip_cookies(headers: &mut HeaderMap, names: &[String]) {
    if names.is_empty() || !headers.contains_key(header::COOKIE) {
        return;
    }
    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name).trim();
            !names.iter().any(|internal| internal == name)
        })
        .map(str::to_string)
        .collect();

    headers.remove(header::COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(header::COOKIE, value);
    }
}

/// Narrow `Accept-Encoding` to codings the proxy can decode, so response bodies stay modifiable.
pub fn restrict_accept_encoding(headers: &mut HeaderMap) {
    let Some(value) = headers.get(header::ACCEPT_ENCODING).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let kept: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|entry| {
            let token = entry.split(';').next().unwrap_or_default();
            Encoding::parse(token).is_some()
        })
        .collect();
    let kept = kept.join(", ");
    match HeaderValue::from_str(&kept) {
        Ok(value) if !kept.is_empty() => {
            headers.insert(header::ACCEPT_ENCODING, value);
        }
        _ => {
            headers.remove(header::ACCEPT_ENCODING);
        }
    }
}

/// Turn the client's headers into the headers sent downstream.
pub fn prepare_downstream_headers(
    headers: &HeaderMap,
    mapping: &HostMapping,
    internal_cookies: &[String],
    client_addr: SocketAddr,
) -> HeaderMap {
    let mut out = headers.clone();
    strip_hop_by_hop(&mut out);
    strip_cookies(&mut out, internal_cookies);

    // The client sets Host and Content-Length for the downstream request.
    let original_host = out.remove(header::HOST);
    out.remove(header::CONTENT_LENGTH);

    for name in [header::ORIGIN, header::REFERER] {
        let rewritten = out
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(|v| mapping.to_downstream(v).into_owned());
        if let Some(value) = rewritten.and_then(|v| HeaderValue::from_str(&v).ok()) {
            out.insert(name, value);
        }
    }

    let client_ip = client_addr.ip().to_string();
    let forwarded_for = match out.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        out.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(mapping.serving_scheme()) {
        out.insert(X_FORWARDED_PROTO, value);
    }
    let forwarded_host = original_host.or_else(|| HeaderValue::from_str(mapping.serving_host()).ok());
    if let Some(value) = forwarded_host {
        out.insert(X_FORWARDED_HOST, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> HostMapping {
        HostMapping::new("proxy.local", "http", "origin.local", "https")
    }

    #[test]
    fn test_downstream_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "proxy.local".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive, x-secret".parse().unwrap());
        headers.insert("x-secret", "1".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        headers.insert(header::REFERER, "http://proxy.local/from".parse().unwrap());
        headers.insert(header::COOKIE, "a=1; flexproxy_session=abc; b=2".parse().unwrap());
        headers.insert(X_REQUEST_ID, "req-1".parse().unwrap());

        let addr: SocketAddr = "10.0.0.5:5555".parse().unwrap();
        let out = prepare_downstream_headers(&headers, &mapping(), &["flexproxy_session".to_string()], addr);

        assert!(out.get(header::HOST).is_none());
        assert!(out.get("x-secret").is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(out[header::REFERER], "https://origin.local/from");
        assert_eq!(out[header::COOKIE], "a=1; b=2");
        assert_eq!(out[X_FORWARDED_FOR], "10.0.0.5");
        assert_eq!(out[X_FORWARDED_PROTO], "http");
        assert_eq!(out[X_FORWARDED_HOST], "proxy.local");
        assert_eq!(out.request_id(), "req-1");
    }

    #[test]
    fn test_only_internal_cookies_removed_entirely() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "flexproxy_session=abc".parse().unwrap());
        strip_cookies(&mut headers, &["flexproxy_session".to_string()]);
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn test_accept_encoding_restricted_to_known_codings() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, "zstd, gzip;q=0.8, br".parse().unwrap());
        restrict_accept_encoding(&mut headers);
        assert_eq!(headers[header::ACCEPT_ENCODING], "gzip;q=0.8, br");

        headers.insert(header::ACCEPT_ENCODING, "zstd".parse().unwrap());
        restrict_accept_encoding(&mut headers);
        assert!(headers.get(header::ACCEPT_ENCODING).is_none());
    }
}
