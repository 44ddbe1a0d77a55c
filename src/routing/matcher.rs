//! Request matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive)
//! - Match exact request path (case-sensitive)
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Default ports are ignored: `proxy.local` matches `proxy.local:80` over http
//! - Path matching is case-sensitive
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{header, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header (or the authority of an absolute-form URI).
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
    default_port: &'static str,
}

impl HostMatcher {
    /// Create a new host matcher for `host` reached over `scheme`.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>, scheme: &str) -> Self {
        let default_port = if scheme.eq_ignore_ascii_case("https") { "443" } else { "80" };
        Self {
            expected_host: normalize(&host.into(), default_port),
            default_port,
        }
    }

    pub fn matches_host(&self, host: &str) -> bool {
        normalize(host, self.default_port) == self.expected_host
    }
}

fn normalize(host: &str, default_port: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    match host.rsplit_once(':') {
        Some((name, port)) if port == default_port => name.to_string(),
        _ => host,
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()))
            .map(|h| self.matches_host(h))
            .unwrap_or(false)
    }
}

/// Matches one exact request path.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    path: String,
}

impl PathMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path() == self.path
    }
}
