//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → tracer.rs (periodic request trace records)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all log lines of an exchange
//! - Metrics are cheap (atomic increments); without an installed recorder they are no-ops
//! - The tracer is a background task stopped by the shutdown broadcast

pub mod logging;
pub mod metrics;
pub mod tracer;

pub use tracer::RequestTracer;
