//! Error types for media-relay.

use crate::transport::{ReviewerId, SourceId};

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Transport errors.
///
/// Capacity exhaustion is deliberately NOT here — it is a designed
/// backpressure signal, surfaced as `transport::SendOutcome::CapacityExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Upstream content is gone (deleted or never cached). Permanent.
    #[error("media not found for message {message} in source {source_id}")]
    NotFound { source_id: SourceId, message: i64 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API call {method} failed: {detail}")]
    Api { method: String, detail: String },
}

impl TransportError {
    /// True when the failure is permanent (no retry path makes sense).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Administration-console errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("reviewer {0} is not allowed to change configuration")]
    NotAuthorized(ReviewerId),

    #[error("cannot demote or delete the last elevated reviewer")]
    LastElevatedReviewer,

    #[error("unknown source {0}")]
    UnknownSource(SourceId),

    #[error("unknown reviewer {0}")]
    UnknownReviewer(ReviewerId),

    #[error("chance must be between 1 and 100, got {0}")]
    InvalidChance(u8),

    #[error("invalid delay bounds: {bottom}..{top} minutes")]
    InvalidDelayRange { bottom: u32, top: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Watermark post-processing errors.
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline errors — wraps the failures a handler can hit mid-event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
