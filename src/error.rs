//! Transport-level errors and their HTTP status mapping.
//!
//! Recoverable conditions (parse failures, modifier faults, unsupported
//! content types) never reach this type; they are handled inside the
//! pipeline and the body is passed through.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::modifier::ModifierError;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Downstream refused or dropped the connection.
    #[error("downstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("downstream did not answer in time")]
    UpstreamTimeout,

    #[error("body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    /// Host header does not name the serving host (strict mode).
    #[error("request is not addressed to {expected}")]
    MisdirectedRequest { expected: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::MisdirectedRequest { .. } => StatusCode::MISDIRECTED_REQUEST,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Classify a client error from the downstream exchange.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            ProxyError::UpstreamUnavailable(err.to_string())
        } else if err.is_timeout() {
            ProxyError::UpstreamTimeout
        } else if err.is_builder() {
            ProxyError::InvalidRequest(err.to_string())
        } else {
            ProxyError::UpstreamUnavailable(err.to_string())
        }
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Modifier(#[from] ModifierError),

    #[error("failed to build downstream client: {0}")]
    Client(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Downstream details stay in the logs.
            ProxyError::UpstreamUnavailable(_) => "Downstream unavailable".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
