//! Loopback health probe.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::routing::{HostMapping, Matcher, PathMatcher};

#[derive(Debug, Clone)]
pub struct HealthProbe {
    enabled: bool,
    path: PathMatcher,
    max_response_time: Duration,
    target: String,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(config: &HealthCheckConfig, mapping: &HostMapping) -> Result<Self, reqwest::Error> {
        let max_response_time = Duration::from_secs(config.max_response_time_secs.max(1));
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(max_response_time)
            .no_proxy()
            .build()?;
        Ok(Self {
            enabled: config.enabled,
            path: PathMatcher::new(config.path.clone()),
            max_response_time,
            target: format!("{}/", mapping.downstream_origin()),
            client,
        })
    }

    /// Whether this request is a probe to answer locally.
    pub fn handles(&self, request: &Request<Body>, client_addr: SocketAddr) -> bool {
        self.enabled
            && matches!(*request.method(), Method::GET | Method::HEAD)
            && client_addr.ip().to_canonical().is_loopback()
            && self.path.matches(request)
    }

    /// Probe the downstream origin.
    pub async fn check(&self) -> bool {
        let probe = self
            .client
            .get(&self.target)
            .header("user-agent", "flex-proxy-health-check")
            .send();

        match time::timeout(self.max_response_time, probe).await {
            Ok(Ok(response)) => {
                let healthy = !response.status().is_server_error();
                if !healthy {
                    tracing::warn!(target_url = %self.target, status = %response.status(), "Health probe failed: server error");
                }
                healthy
            }
            Ok(Err(e)) => {
                tracing::warn!(target_url = %self.target, error = %e, "Health probe failed: request error");
                false
            }
            Err(_) => {
                tracing::warn!(target_url = %self.target, "Health probe failed: timeout");
                false
            }
        }
    }

    pub async fn respond(&self) -> Response {
        if self.check().await {
            (StatusCode::OK, "Healthy").into_response()
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy").into_response()
        }
    }
}
