//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (idempotent methods only)
//! - Decide how many attempts a request gets
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Jittered backoff prevents thundering herd
//! - Connection failures are retryable; timeouts and responses are not,
//!   the downstream may already have acted on the request

use axum::http::Method;

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::from_config(config),
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::from_config(&RetryConfig::default())
    }

    /// Total attempts allowed for `method`, including the first.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if self.enabled && method.is_idempotent() {
            self.max_attempts
        } else {
            1
        }
    }

    /// Whether a failed `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, method: &Method, attempt: u32, connect_failure: bool) -> bool {
        connect_failure && attempt < self.attempts_for(method)
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}
