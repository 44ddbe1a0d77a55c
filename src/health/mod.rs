//! Health subsystem.
//!
//! # Data Flow
//! ```text
//! GET <health_check.path> from a loopback address
//!     → probe.rs (GET downstream origin within max_response_time)
//!     → 200 Healthy | 503 Unhealthy, answered locally
//! ```
//!
//! # Design Decisions
//! - Only loopback clients are answered locally; anyone else is proxied as usual
//! - A downstream answer of any non-5xx status counts as healthy

pub mod probe;

pub use probe::HealthProbe;
