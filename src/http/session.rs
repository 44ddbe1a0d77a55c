//! Session cookie collaborator.
//!
//! When enabled, a request arriving without the session cookie gets a
//! `Set-Cookie` carrying a fresh UUID on its response. The cookie is one of
//! the internal cookies and is never forwarded downstream.

use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::config::SessionConfig;

#[derive(Debug, Clone)]
pub struct SessionIssuer {
    enabled: bool,
    cookie_name: String,
}

impl SessionIssuer {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            enabled: config.enabled && !config.event_session_cookie_name.is_empty(),
            cookie_name: config.event_session_cookie_name.clone(),
        }
    }

    /// Whether the response to a request with `headers` should issue a cookie.
    pub fn needs_cookie(&self, headers: &HeaderMap) -> bool {
        self.enabled && !has_cookie(headers, &self.cookie_name)
    }

    pub fn issue(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name,
            Uuid::new_v4()
        ))
        .ok()
    }
}

fn has_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, _)| key.trim() == name)
}
