//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → matcher.rs (is this addressed to the serving host? the probe path?)
//!     → mapping.rs (serving origin → downstream origin)
//!     → Forwarder
//!
//! Bodies and headers written back to the client:
//!     → mapping.rs (downstream origin → serving origin)
//! ```
//!
//! # Design Decisions
//! - One mapping, built at startup, immutable at runtime
//! - No regex in hot path (origin prefix scans only)
//! - Host comparison is case-insensitive, paths are not

pub mod mapping;
pub mod matcher;

pub use mapping::{HostMapping, UrlRewrite};
pub use matcher::{HostMatcher, Matcher, PathMatcher};
