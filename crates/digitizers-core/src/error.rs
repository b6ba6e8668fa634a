//! Error types for the streaming stages
//!
//! Only construction-time misconfiguration is surfaced as a hard failure.
//! Everything that goes wrong while samples are flowing (starvation,
//! unsatisfiable triggers, malformed payloads) is recovered inside the stage.

use crate::tags::TagKind;
use thiserror::Error;

/// Misconfiguration detected before the stream starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Trigger window is empty (pre_trigger {pre_trigger} + post_trigger {post_trigger})")]
    EmptyWindow { pre_trigger: u64, post_trigger: u64 },

    #[error("Post-mortem buffer capacity must be non-zero")]
    ZeroCapacity,

    #[error("Batch size must be non-zero")]
    ZeroBatch,

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure to decode a tag payload into its typed form
#[derive(Error, Debug)]
pub enum TagError {
    #[error("Expected {expected:?} tag, found {found:?}")]
    WrongKind { expected: TagKind, found: TagKind },

    #[error("Malformed tag payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure to bring up the acquisition pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}
