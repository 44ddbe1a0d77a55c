//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, header preparation)
//!     → orchestrator.rs (per-exchange pipeline)
//!         → compression.rs (decode / re-encode bodies)
//!         → forwarder.rs (downstream exchange)
//!     → response.rs (header rewrite, body description)
//!     → session.rs (session cookie)
//!     → Send to client
//! ```

pub mod compression;
pub mod exchange;
pub mod forwarder;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod server;
pub mod session;

pub use exchange::{BodyOutcome, ProxyExchange};
pub use orchestrator::Orchestrator;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::HttpServer;
