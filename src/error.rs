//! Error types for the spam pipeline.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the external mail collaborators.
///
/// These never escape the stage that observed them: the affected batch or
/// message is dropped and the pipeline keeps going.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{operation} unavailable: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Downstream channel closed")]
    ChannelClosed,

    #[error("Stage {stage} panicked: {reason}")]
    StagePanicked { stage: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
