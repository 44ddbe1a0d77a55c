//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to downstream:
//!     → connect/request timeouts (enforced by the forwarder's client)
//!     → On connection failure: retries.rs (retryable? attempts left?)
//!     → backoff.rs (exponential delay with jitter before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - Retries are off unless configured, and only for idempotent requests
//! - Only connection failures are retried; a response is always final

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::RetryPolicy;
