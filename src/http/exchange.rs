//! Per-request exchange state.
//!
//! A `ProxyExchange` is created when a request arrives, owned by the task
//! handling it, and dropped once the response has been handed to the server.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, Uri};
use url::Url;

use crate::content::MediaType;
use crate::http::request::RequestIdExt;
use crate::modifier::Phase;
use crate::observability::metrics;

/// What happened to one body of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyOutcome {
    /// Forwarded as a stream without inspection.
    #[default]
    Streamed,
    /// Buffered, but forwarded byte-for-byte.
    PassedThrough,
    /// Parsed, modified and reserialized.
    Modified,
    /// Buffered identity body compressed for the client.
    Compressed,
}

impl BodyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BodyOutcome::Streamed => "streamed",
            BodyOutcome::PassedThrough => "passed_through",
            BodyOutcome::Modified => "modified",
            BodyOutcome::Compressed => "compressed",
        }
    }
}

#[derive(Debug)]
pub struct ProxyExchange {
    request_id: String,
    method: Method,
    uri: Uri,
    client_addr: SocketAddr,
    started: Instant,
    downstream_url: Option<Url>,
    request_content_type: Option<MediaType>,
    response_content_type: Option<MediaType>,
    request_body: BodyOutcome,
    response_body: BodyOutcome,
}

impl ProxyExchange {
    pub fn new(request: &Request<Body>, client_addr: SocketAddr) -> Self {
        Self {
            request_id: request.request_id().to_string(),
            method: request.method().clone(),
            uri: request.uri().clone(),
            client_addr,
            started: Instant::now(),
            downstream_url: None,
            request_content_type: MediaType::from_headers(request.headers()),
            response_content_type: None,
            request_body: BodyOutcome::default(),
            response_body: BodyOutcome::default(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn downstream_url(&self) -> Option<&Url> {
        self.downstream_url.as_ref()
    }

    pub fn set_downstream_url(&mut self, url: Url) {
        self.downstream_url = Some(url);
    }

    pub fn content_type(&self, phase: Phase) -> Option<&MediaType> {
        match phase {
            Phase::Request => self.request_content_type.as_ref(),
            Phase::Response => self.response_content_type.as_ref(),
        }
    }

    pub fn set_response_content_type(&mut self, media: Option<MediaType>) {
        self.response_content_type = media;
    }

    pub fn body(&self, phase: Phase) -> BodyOutcome {
        match phase {
            Phase::Request => self.request_body,
            Phase::Response => self.response_body,
        }
    }

    pub fn set_body(&mut self, phase: Phase, outcome: BodyOutcome) {
        match phase {
            Phase::Request => self.request_body = outcome,
            Phase::Response => self.response_body = outcome,
        }
    }

    /// True when either body was rewritten by modifiers.
    pub fn modified(&self) -> bool {
        self.request_body == BodyOutcome::Modified || self.response_body == BodyOutcome::Modified
    }

    /// Log and count the finished exchange.
    pub fn finish(&self, status: StatusCode) {
        metrics::record_request(self.method.as_str(), status.as_u16(), self.started);
        tracing::info!(
            request_id = %self.request_id,
            method = %self.method,
            path = %self.uri.path(),
            client = %self.client_addr,
            downstream = self.downstream_url.as_ref().map(Url::as_str).unwrap_or("-"),
            status = status.as_u16(),
            request_body = self.request_body.as_str(),
            response_body = self.response_body.as_str(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Exchange finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_exchange_reads_request_metadata() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header("x-request-id", "abc")
            .header("content-type", "Application/JSON; charset=utf-8")
            .body(Body::empty())
            .unwrap();
        let mut exchange = ProxyExchange::new(&request, "127.0.0.1:4000".parse().unwrap());

        assert_eq!(exchange.request_id(), "abc");
        assert_eq!(exchange.content_type(Phase::Request).map(MediaType::essence), Some("application/json"));
        assert!(exchange.content_type(Phase::Response).is_none());
        assert!(!exchange.modified());

        exchange.set_body(Phase::Response, BodyOutcome::Modified);
        assert!(exchange.modified());
        assert_eq!(exchange.body(Phase::Request), BodyOutcome::Streamed);
    }
}
