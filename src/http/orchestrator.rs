//! Per-exchange pipeline coordination.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → host check (421) / local health probe
//!     → request phase: buffer → decode → parse → modifiers → serialize → re-encode
//!     → forwarder.rs (downstream exchange)
//!     → response phase: buffer → decode → parse → modifiers → serialize
//!     → re-encode or compress for the client, or stream untouched
//!     → session cookie, tracer, exchange log
//! ```
//!
//! # Design Decisions
//! - A body is only buffered when something will look at it; otherwise it streams
//! - Parse failures and unsupported types pass the original bytes through
//! - CPU-bound parse/modify/serialize runs on the blocking pool
//! - Dropping the handler future (client gone) drops the downstream request;
//!   any in-flight rewrite result is discarded

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};

use crate::config::ProxyConfig;
use crate::content::{ContentRegistry, MediaType};
use crate::error::{ProxyError, StartupError};
use crate::health::HealthProbe;
use crate::http::compression::{accepts, Compressor, Encoding};
use crate::http::exchange::{BodyOutcome, ProxyExchange};
use crate::http::forwarder::{Forwarder, OutboundBody};
use crate::http::response::{describe_body, prepare_client_headers, vary_on_accept_encoding};
use crate::http::session::SessionIssuer;
use crate::modifier::{ModifierSet, Phase};
use crate::observability::metrics;
use crate::observability::RequestTracer;
use crate::routing::{HostMapping, HostMatcher, Matcher, UrlRewrite};

/// Everything an exchange needs, built once at startup and shared read-only.
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<ProxyConfig>,
    mapping: HostMapping,
    host: HostMatcher,
    modifiers: Arc<ModifierSet>,
    forwarder: Forwarder,
    compressor: Compressor,
    session: SessionIssuer,
    health: HealthProbe,
    tracer: Arc<RequestTracer>,
}

impl Orchestrator {
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self, StartupError> {
        let registry = ContentRegistry::from_config(&config.content_providers());
        let modifiers = Arc::new(ModifierSet::compile(&config.modifiers, registry)?);
        let rewrites_responses = modifiers.modifiers().iter().any(|m| m.phase() == Phase::Response);

        let mapping = HostMapping::from_config(&config.host_mapping);
        let host = HostMatcher::new(mapping.serving_host(), mapping.serving_scheme());
        let forwarder = Forwarder::new(&config, rewrites_responses)?;
        let health = HealthProbe::new(&config.health_check, &mapping)?;
        let tracer = Arc::new(RequestTracer::new(
            config.request_tracer.clone(),
            mapping.serving_host(),
        ));

        tracing::info!(
            serving = %mapping.serving_origin(),
            downstream = %mapping.downstream_origin(),
            modifiers = modifiers.modifiers().len(),
            "Proxy pipeline ready"
        );

        Ok(Self {
            compressor: Compressor::from_config(&config.compression),
            session: SessionIssuer::from_config(&config.session),
            config,
            mapping,
            host,
            modifiers,
            forwarder,
            health,
            tracer,
        })
    }

    pub fn tracer(&self) -> Arc<RequestTracer> {
        Arc::clone(&self.tracer)
    }

    pub fn modifiers(&self) -> &ModifierSet {
        &self.modifiers
    }

    /// Handle one exchange end to end. Never fails: errors become responses.
    pub async fn handle(&self, request: Request<Body>, client_addr: SocketAddr) -> Response {
        let mut exchange = ProxyExchange::new(&request, client_addr);
        let issue_session = self.session.needs_cookie(request.headers());

        let mut response = match self.run(&mut exchange, request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    request_id = %exchange.request_id(),
                    status = err.status().as_u16(),
                    error = %err,
                    "Exchange failed"
                );
                err.into_response()
            }
        };

        if issue_session {
            if let Some(cookie) = self.session.issue() {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
        }

        let status = response.status();
        self.tracer.record(status.as_u16(), exchange.modified());
        exchange.finish(status);
        response
    }

    async fn run(&self, exchange: &mut ProxyExchange, request: Request<Body>) -> Result<Response, ProxyError> {
        if self.config.host_mapping.strict_host && !self.host.matches(&request) {
            return Err(ProxyError::MisdirectedRequest {
                expected: self.mapping.serving_host().to_string(),
            });
        }
        if self.health.handles(&request, exchange.client_addr()) {
            return Ok(self.health.respond().await);
        }

        let (parts, body) = request.into_parts();
        let accept_encoding = parts
            .headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let outbound = self.request_body(exchange, &parts.headers, body).await?;
        let downstream = self.forwarder.forward(exchange, &parts.headers, outbound).await?;
        self.response(exchange, downstream, accept_encoding.as_deref()).await
    }

    async fn request_body(
        &self,
        exchange: &mut ProxyExchange,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<OutboundBody, ProxyError> {
        let limit = self.config.proxy.max_body_size;
        let media = exchange.content_type(Phase::Request).cloned();
        let modify = media
            .as_ref()
            .is_some_and(|m| self.modifiers.has_modifiers(m.essence(), Phase::Request));
        let bodiless = !headers.contains_key(header::CONTENT_LENGTH)
            && !headers.contains_key(header::TRANSFER_ENCODING);
        let retryable = self.forwarder.retry_policy().attempts_for(exchange.method()) > 1;

        if !modify && !retryable && !bodiless {
            return Ok(OutboundBody::Streaming(body, headers.get(header::CONTENT_LENGTH).cloned()));
        }

        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| ProxyError::BodyTooLarge { limit })?;

        let (Some(media), Some(encoding), true) = (media, Encoding::from_headers(headers), modify) else {
            if !bytes.is_empty() {
                exchange.set_body(Phase::Request, BodyOutcome::PassedThrough);
            }
            return Ok(OutboundBody::Buffered(bytes));
        };

        exchange.set_body(Phase::Request, BodyOutcome::PassedThrough);
        let Some(rewritten) = self.transform(exchange, Phase::Request, media, encoding, bytes.clone()).await else {
            return Ok(OutboundBody::Buffered(bytes));
        };
        match encoding.encode(&rewritten, self.compressor.level()) {
            Ok(encoded) => {
                exchange.set_body(Phase::Request, BodyOutcome::Modified);
                Ok(OutboundBody::Buffered(Bytes::from(encoded)))
            }
            Err(e) => {
                tracing::warn!(request_id = %exchange.request_id(), error = %e, "Re-encoding request body failed");
                Ok(OutboundBody::Buffered(bytes))
            }
        }
    }

    async fn response(
        &self,
        exchange: &mut ProxyExchange,
        downstream: reqwest::Response,
        accept_encoding: Option<&str>,
    ) -> Result<Response, ProxyError> {
        let status = downstream.status();
        let mut headers = prepare_client_headers(downstream.headers(), &self.mapping);
        let media = MediaType::from_headers(downstream.headers());
        exchange.set_response_content_type(media.clone());

        let encoding = Encoding::from_headers(downstream.headers());
        let length = downstream.content_length();
        let limit = self.config.proxy.max_body_size;
        let has_body = *exchange.method() != Method::HEAD
            && !status.is_informational()
            && !matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED);
        let fits = length.map_or(true, |len| len <= limit as u64);

        let modify = has_body
            && fits
            && encoding.is_some()
            && media
                .as_ref()
                .is_some_and(|m| self.modifiers.has_modifiers(m.essence(), Phase::Response));
        let compress = has_body
            && encoding == Some(Encoding::Identity)
            && status != StatusCode::PARTIAL_CONTENT
            && !headers.contains_key(header::CONTENT_RANGE)
            && length.is_some_and(|len| len <= limit as u64)
            && media
                .as_ref()
                .and_then(|m| self.compressor.negotiate(accept_encoding, m.essence()))
                .is_some();

        if !modify && !compress {
            return Ok(build_response(status, headers, Body::from_stream(downstream.bytes_stream())));
        }

        let bytes = match collect_bounded(downstream, limit).await? {
            Collected::Complete(bytes) => bytes,
            Collected::Overflow(body) => {
                tracing::debug!(
                    request_id = %exchange.request_id(),
                    limit,
                    "Response body exceeds the size limit, streaming it unmodified"
                );
                exchange.set_body(Phase::Response, BodyOutcome::PassedThrough);
                return Ok(build_response(status, headers, body));
            }
        };
        let (Some(media), Some(encoding)) = (media, encoding) else {
            exchange.set_body(Phase::Response, BodyOutcome::PassedThrough);
            return Ok(build_response(status, headers, Body::from(bytes)));
        };

        let rewritten = if modify {
            self.transform(exchange, Phase::Response, media.clone(), encoding, bytes.clone())
                .await
        } else {
            None
        };

        let body = match rewritten {
            Some(rewritten) => {
                let target = if encoding != Encoding::Identity && accepts(accept_encoding, encoding) {
                    encoding
                } else {
                    self.compressor
                        .negotiate(accept_encoding, media.essence())
                        .unwrap_or(Encoding::Identity)
                };
                let (body, applied) = self.encode_for_client(exchange, rewritten, target);
                describe_body(&mut headers, body.len(), applied, true);
                if applied != Encoding::Identity {
                    vary_on_accept_encoding(&mut headers);
                }
                exchange.set_body(Phase::Response, BodyOutcome::Modified);
                Bytes::from(body)
            }
            None => match self.compressor.negotiate(accept_encoding, media.essence()) {
                Some(target) if encoding == Encoding::Identity => {
                    let (body, applied) = self.encode_for_client(exchange, bytes.to_vec(), target);
                    describe_body(&mut headers, body.len(), applied, false);
                    vary_on_accept_encoding(&mut headers);
                    exchange.set_body(Phase::Response, BodyOutcome::Compressed);
                    Bytes::from(body)
                }
                _ => {
                    exchange.set_body(Phase::Response, BodyOutcome::PassedThrough);
                    bytes
                }
            },
        };

        Ok(build_response(status, headers, Body::from(body)))
    }

    /// Encode `body` for the client, falling back to identity when the codec fails.
    fn encode_for_client(&self, exchange: &ProxyExchange, body: Vec<u8>, target: Encoding) -> (Vec<u8>, Encoding) {
        match target.encode(&body, self.compressor.level()) {
            Ok(encoded) => (encoded, target),
            Err(e) => {
                tracing::warn!(request_id = %exchange.request_id(), error = %e, "Response encoding failed, sending identity");
                (body, Encoding::Identity)
            }
        }
    }

    /// Run the body rewrite on the blocking pool. `None` means "send the original".
    async fn transform(
        &self,
        exchange: &ProxyExchange,
        phase: Phase,
        media: MediaType,
        encoding: Encoding,
        body: Bytes,
    ) -> Option<Vec<u8>> {
        let modifiers = Arc::clone(&self.modifiers);
        let rewrite = self.mapping.rewrite_for(phase);
        let limit = self.config.proxy.max_body_size;
        let span = tracing::debug_span!("rewrite", request_id = %exchange.request_id(), phase = %phase);

        let task = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            rewrite_body(&modifiers, phase, &media, encoding, &body, limit, rewrite)
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(request_id = %exchange.request_id(), error = %e, "Body rewrite task failed");
                None
            }
        }
    }
}

/// A downstream body read up to the size limit.
enum Collected {
    Complete(Bytes),
    /// The limit was exceeded: the chunks already read followed by the rest of the stream.
    Overflow(Body),
}

/// Read `downstream` into memory unless it grows past `limit` bytes.
async fn collect_bounded(downstream: reqwest::Response, limit: usize) -> Result<Collected, ProxyError> {
    let mut chunks = Box::pin(downstream.bytes_stream());
    let mut head: Vec<Bytes> = Vec::new();
    let mut read = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| ProxyError::from_reqwest(&e))?;
        read += chunk.len();
        head.push(chunk);
        if read > limit {
            let replay = stream::iter(head.into_iter().map(Ok::<Bytes, reqwest::Error>));
            return Ok(Collected::Overflow(Body::from_stream(replay.chain(chunks))));
        }
    }
    if head.len() == 1 {
        return Ok(Collected::Complete(head.swap_remove(0)));
    }
    Ok(Collected::Complete(Bytes::from(head.concat())))
}

/// Decode, parse, modify and serialize one body.
///
/// Returns the new identity-encoded body, or `None` when the original bytes
/// should be sent: unsupported type, undecodable or unparsable body, or no
/// modifier changed the document.
pub fn rewrite_body(
    modifiers: &ModifierSet,
    phase: Phase,
    media: &MediaType,
    encoding: Encoding,
    body: &[u8],
    limit: usize,
    rewrite: UrlRewrite,
) -> Option<Vec<u8>> {
    let content_type = media.essence();
    let abstraction = modifiers.registry().resolve(content_type)?;

    let decoded = match encoding.decode(body, limit) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(content_type = %content_type, error = %e, "Body not decodable, passing through");
            return None;
        }
    };

    let document = match abstraction.parse(&decoded, media) {
        Ok(document) => document,
        Err(e) => {
            metrics::record_parse_failure(content_type);
            tracing::warn!(content_type = %content_type, error = %e, "Parse failure, passing body through");
            return None;
        }
    };

    let (document, report) = modifiers.apply(document, content_type, phase, Some(rewrite));
    tracing::debug!(
        content_type = %content_type,
        applied = ?report.applied,
        failures = report.failures.len(),
        "Modifiers finished"
    );
    if !document.is_dirty() {
        return None;
    }

    metrics::record_body_modified(phase, content_type);
    Some(abstraction.serialize(&document))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
