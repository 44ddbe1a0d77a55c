//! Downstream forwarding.
//!
//! # Responsibilities
//! - Map the inbound URI onto the downstream origin
//! - Send the request with prepared headers and the (possibly rewritten) body
//! - Classify failures (connect → 502, timeout → 504)
//! - Retry connection failures when configured
//!
//! # Design Decisions
//! - Redirects are never followed; the client sees them (with rewritten Location)
//! - Bodies are never decompressed by the client; the orchestrator owns codings
//! - Only buffered bodies can be retried

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::exchange::ProxyExchange;
use crate::http::request::{prepare_downstream_headers, restrict_accept_encoding};
use crate::resilience::RetryPolicy;
use crate::routing::HostMapping;

/// Body of a forwarded request.
#[derive(Debug)]
pub enum OutboundBody {
    /// Fully buffered; re-sendable.
    Buffered(Bytes),
    /// Client body streamed through, with its declared length if any.
    Streaming(Body, Option<HeaderValue>),
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    mapping: HostMapping,
    internal_cookies: Vec<String>,
    retry: RetryPolicy,
    restrict_encodings: bool,
}

impl Forwarder {
    /// `restrict_encodings` narrows `Accept-Encoding` to codings the proxy can decode.
    pub fn new(config: &ProxyConfig, restrict_encodings: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            mapping: HostMapping::from_config(&config.host_mapping),
            internal_cookies: config.internal_cookies(),
            retry: RetryPolicy::from_config(&config.retries),
            restrict_encodings,
        })
    }

    pub fn mapping(&self) -> &HostMapping {
        &self.mapping
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn forward(
        &self,
        exchange: &mut ProxyExchange,
        headers: &HeaderMap,
        body: OutboundBody,
    ) -> Result<reqwest::Response, ProxyError> {
        let method = exchange.method().clone();
        let url = self
            .mapping
            .downstream_url(exchange.uri())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        exchange.set_downstream_url(url.clone());

        let mut headers = prepare_downstream_headers(headers, &self.mapping, &self.internal_cookies, exchange.client_addr());
        if self.restrict_encodings {
            restrict_accept_encoding(&mut headers);
        }

        tracing::debug!(
            request_id = %exchange.request_id(),
            method = %method,
            downstream = %url,
            "Forwarding request"
        );

        match body {
            OutboundBody::Buffered(bytes) => {
                let attempts = self.retry.attempts_for(&method);
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let mut request = self
                        .client
                        .request(method.clone(), url.clone())
                        .headers(headers.clone());
                    if !bytes.is_empty() || !matches!(method, Method::GET | Method::HEAD) {
                        request = request.body(bytes.clone());
                    }

                    match request.send().await {
                        Ok(response) => return Ok(response),
                        Err(e) if self.retry.should_retry(&method, attempt, e.is_connect()) => {
                            let delay = self.retry.backoff().delay(attempt);
                            tracing::info!(
                                request_id = %exchange.request_id(),
                                attempt = attempt,
                                max_attempts = attempts,
                                delay = ?delay,
                                error = %e,
                                "Retrying after connection error"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            tracing::error!(
                                request_id = %exchange.request_id(),
                                attempt = attempt,
                                error = %e,
                                "Downstream error"
                            );
                            return Err(ProxyError::from_reqwest(&e));
                        }
                    }
                }
            }
            OutboundBody::Streaming(body, content_length) => {
                if let Some(len) = content_length {
                    headers.insert(header::CONTENT_LENGTH, len);
                }
                self.client
                    .request(method, url)
                    .headers(headers)
                    .body(reqwest::Body::wrap_stream(body.into_data_stream()))
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::error!(request_id = %exchange.request_id(), error = %e, "Downstream error");
                        ProxyError::from_reqwest(&e)
                    })
            }
        }
    }
}
