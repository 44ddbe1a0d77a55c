//! Content modifiers.
//!
//! # Data Flow
//! ```text
//! [[modifiers]] config entries
//!     → engine.rs (compile rhai scripts once, at startup)
//!     → pipeline.rs (stable sort by priority, freeze as ModifierSet)
//!
//! Per body:
//!     Document + content type + phase
//!     → pipeline.rs (select matching modifiers)
//!     → engine.rs (run each script against the document API)
//!     → Document' + PipelineReport
//! ```
//!
//! # Design Decisions
//! - Scripts are compiled once and shared read-only by every request
//! - A script only ever sees the document handle it is given, never the
//!   raw bytes, the host mapping or other requests
//! - One failing modifier never aborts the pipeline

pub mod engine;
pub mod pipeline;

pub use engine::ScriptEngine;
pub use pipeline::{FailureKind, ModifierFailure, ModifierSet, PipelineReport};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which body a modifier runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[serde(alias = "Request")]
    Request,
    #[serde(alias = "Response")]
    Response,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup-time modifier errors.
#[derive(Debug, Error)]
pub enum ModifierError {
    #[error("modifier `{modifier}` failed to compile: {message}")]
    Compile { modifier: String, message: String },
}
