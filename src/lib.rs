//! Content-modifying reverse proxy library.
//!
//! Requests addressed to the serving host are forwarded to a downstream
//! origin. Bodies of registered content types can be parsed into a
//! [`document::Document`], rewritten by scripted modifiers, and serialized
//! again on the way through.

// Core subsystems
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod http;
pub mod modifier;
pub mod routing;

// Collaborators
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
