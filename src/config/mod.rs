//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + command-line overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to every request
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use schema::{
    CompressionConfig, CompressionProvider, ContentProviderConfig, ForwardingConfig, HealthCheckConfig,
    HostMappingConfig, ListenerConfig, ModifierConfig, ObservabilityConfig, ProxyConfig, RequestTracerConfig,
    RetryConfig, SessionConfig, TimeoutConfig,
};
