//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::content::Abstraction;
use crate::modifier::Phase;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Serving → downstream host/scheme mapping.
    pub host_mapping: HostMappingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Forwarding behaviour.
    pub proxy: ForwardingConfig,

    /// Session cookie issuance.
    pub session: SessionConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// MIME type registrations per content abstraction, in priority order.
    pub content_providers: Vec<ContentProviderConfig>,

    /// Content modifiers.
    pub modifiers: Vec<ModifierConfig>,

    /// Local health probe.
    pub health_check: HealthCheckConfig,

    /// Periodic request trace records.
    pub request_tracer: RequestTracerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Cookie names that are never forwarded downstream.
    ///
    /// Always includes the session cookie.
    pub fn internal_cookies(&self) -> Vec<String> {
        let mut cookies = self.proxy.internal_cookies.clone();
        let session = &self.session.event_session_cookie_name;
        if !session.is_empty() && !cookies.iter().any(|c| c == session) {
            cookies.push(session.clone());
        }
        cookies
    }

    /// Configured content providers, or the stock registrations when none are given.
    pub fn content_providers(&self) -> Vec<ContentProviderConfig> {
        if self.content_providers.is_empty() {
            default_content_providers()
        } else {
            self.content_providers.clone()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Host mapping configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostMappingConfig {
    /// Host (and optional port) clients address the proxy as.
    pub serving_host: String,

    /// Scheme clients use to reach the proxy.
    pub serving_scheme: String,

    /// Origin host (and optional port) requests are forwarded to.
    pub downstream_host: String,

    /// Scheme used towards the origin.
    pub downstream_scheme: String,

    /// Reject requests whose Host header is not the serving host.
    pub strict_host: bool,
}

impl Default for HostMappingConfig {
    fn default() -> Self {
        Self {
            serving_host: "localhost:8080".to_string(),
            serving_scheme: "http".to_string(),
            downstream_host: "localhost:3000".to_string(),
            downstream_scheme: "http".to_string(),
            strict_host: false,
        }
    }
}

/// Timeout configuration for downstream exchanges.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Cookies stripped from requests before they go downstream.
    pub internal_cookies: Vec<String>,

    /// Maximum buffered body size in bytes.
    pub max_body_size: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            internal_cookies: Vec::new(),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session-identifying cookie.
    pub event_session_cookie_name: String,

    /// Issue the cookie when a request arrives without it.
    pub enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_session_cookie_name: "flexproxy_session".to_string(),
            enabled: false,
        }
    }
}

/// Compression algorithm names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionProvider {
    Gzip,
    Deflate,
    #[serde(alias = "brotli")]
    Br,
}

/// Response compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress eligible identity responses.
    pub enabled: bool,

    /// Providers in preference order.
    pub providers: Vec<CompressionProvider>,

    /// MIME types eligible for compression.
    pub mime_types: Vec<String>,

    /// Compression level (1 = fastest).
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: vec![CompressionProvider::Gzip],
            mime_types: [
                "text/plain",
                "text/css",
                "application/javascript",
                "text/html",
                "application/xml",
                "text/xml",
                "application/json",
                "text/json",
                "text/javascript",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            level: 1,
        }
    }
}

/// One content abstraction and the MIME types routed to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentProviderConfig {
    pub abstraction: Abstraction,
    pub mime_types: Vec<String>,
}

/// The stock registrations.
pub fn default_content_providers() -> Vec<ContentProviderConfig> {
    fn entry(abstraction: Abstraction, mime_types: &[&str]) -> ContentProviderConfig {
        ContentProviderConfig {
            abstraction,
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
        }
    }
    vec![
        entry(Abstraction::Html, &["text/html"]),
        entry(
            Abstraction::Form,
            &["multipart/form-data", "application/x-www-form-urlencoded"],
        ),
        entry(
            Abstraction::JavaScript,
            &[
                "text/javascript",
                "\u{200B}text/x-javascript",
                "application/javascript",
                "application/x-javascript",
                "text/ecmascript",
                "application/ecmascript",
                "text/jscript",
            ],
        ),
        entry(Abstraction::Json, &["application/json"]),
    ]
}

/// A content modifier definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModifierConfig {
    /// Identifier used in logs and metrics (defaults to `modifier-<n>`).
    #[serde(default)]
    pub name: Option<String>,

    /// Lower runs first; ties keep declaration order.
    #[serde(default)]
    pub priority: i64,

    /// Request or response body.
    #[serde(alias = "request_phase")]
    pub phase: Phase,

    /// MIME type the modifier applies to.
    pub target_content_type: String,

    /// Script source.
    #[serde(alias = "modification_function")]
    pub script: String,
}

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the loopback probe endpoint.
    pub enabled: bool,

    /// Path answered locally for loopback clients.
    pub path: String,

    /// The downstream must answer within this many seconds.
    pub max_response_time_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/healthcheck".to_string(),
            max_response_time_secs: 5,
        }
    }
}

/// Request tracer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestTracerConfig {
    pub enabled: bool,

    /// Name the trace records are emitted under.
    pub logger_name: String,

    /// Seconds between trace records.
    pub interval_secs: u64,
}

impl Default for RequestTracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logger_name: "RequestTraceLogger".to_string(),
            interval_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. Off unless configured.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [host_mapping]
            serving_host = "proxy.local"
            downstream_host = "origin.local"
            downstream_scheme = "https"
            "#,
        )
        .unwrap();

        assert_eq!(config.host_mapping.serving_scheme, "http");
        assert_eq!(config.host_mapping.downstream_scheme, "https");
        assert!(config.content_providers.is_empty());
        assert_eq!(config.content_providers().len(), 4);
        assert!(!config.retries.enabled);
        assert_eq!(config.compression.providers, vec![CompressionProvider::Gzip]);
    }

    #[test]
    fn test_modifier_entries() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[modifiers]]
            priority = 2
            phase = "response"
            target_content_type = "text/html"
            script = "document.commit();"

            [[modifiers]]
            name = "strip-token"
            request_phase = "Request"
            target_content_type = "application/json"
            modification_function = "document.remove(\"/token\");"
            "#,
        )
        .unwrap();

        assert_eq!(config.modifiers.len(), 2);
        assert_eq!(config.modifiers[0].phase, Phase::Response);
        assert_eq!(config.modifiers[0].name, None);
        assert_eq!(config.modifiers[1].phase, Phase::Request);
        assert_eq!(config.modifiers[1].priority, 0);
        assert_eq!(config.modifiers[1].name.as_deref(), Some("strip-token"));
    }

    #[test]
    fn test_internal_cookies_include_session_cookie() {
        let mut config = ProxyConfig::default();
        config.proxy.internal_cookies = vec!["debug".into()];
        assert_eq!(config.internal_cookies(), vec!["debug".to_string(), "flexproxy_session".to_string()]);
    }
}
