//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (modifiers target registered content types)
//! - Validate value ranges (timeouts > 0, schemes known)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::ProxyConfig;
use crate::content::ContentRegistry;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mapping = &config.host_mapping;
    for (field, host) in [
        ("host_mapping.serving_host", &mapping.serving_host),
        ("host_mapping.downstream_host", &mapping.downstream_host),
    ] {
        if host.trim().is_empty() {
            errors.push(ValidationError::new(field, "must not be empty"));
        } else if host.contains('/') {
            errors.push(ValidationError::new(field, "must be a host[:port], not a URL"));
        }
    }
    for (field, scheme) in [
        ("host_mapping.serving_scheme", &mapping.serving_scheme),
        ("host_mapping.downstream_scheme", &mapping.downstream_scheme),
    ] {
        if !matches!(scheme.as_str(), "http" | "https") {
            errors.push(ValidationError::new(field, format!("unsupported scheme `{scheme}`")));
        }
    }

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than zero"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }
    if config.proxy.max_body_size == 0 {
        errors.push(ValidationError::new("proxy.max_body_size", "must be greater than zero"));
    }

    for (i, provider) in config.content_providers.iter().enumerate() {
        if provider.mime_types.iter().all(|m| m.trim().is_empty()) {
            errors.push(ValidationError::new(
                format!("content_providers[{i}].mime_types"),
                "must list at least one MIME type",
            ));
        }
    }

    let registry = ContentRegistry::from_config(&config.content_providers());
    for (i, modifier) in config.modifiers.iter().enumerate() {
        if modifier.script.trim().is_empty() {
            errors.push(ValidationError::new(format!("modifiers[{i}].script"), "must not be empty"));
        }
        if !registry.is_registered(&modifier.target_content_type) {
            errors.push(ValidationError::new(
                format!("modifiers[{i}].target_content_type"),
                format!("`{}` is not registered with any content provider", modifier.target_content_type),
            ));
        }
    }

    if config.compression.enabled && config.compression.providers.is_empty() {
        errors.push(ValidationError::new("compression.providers", "must not be empty when enabled"));
    }
    if config.compression.level > 11 {
        errors.push(ValidationError::new("compression.level", "must be between 0 and 11"));
    }
    if config.request_tracer.enabled && config.request_tracer.interval_secs == 0 {
        errors.push(ValidationError::new("request_tracer.interval_secs", "must be greater than zero"));
    }
    if config.health_check.enabled {
        if !config.health_check.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with `/`"));
        }
        if config.health_check.max_response_time_secs == 0 {
            errors.push(ValidationError::new(
                "health_check.max_response_time_secs",
                "must be greater than zero",
            ));
        }
    }
    if config.retries.enabled && config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
