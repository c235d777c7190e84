//! Error types for minstrel-vp
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Pipeline and sink failures are recoverable at the session
//! level (the scheduler skips to the next track); they must never take the
//! process down.

use thiserror::Error;

/// Main error type for minstrel-vp
#[derive(Error, Debug)]
pub enum Error {
    /// Input path or URL does not exist; reported to the caller, not enqueued
    #[error("Input not found: {0}")]
    InputNotFound(String),

    /// Extension or content type outside the allow-list; not enqueued
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Volume outside the 0-100 surface range
    #[error("Volume out of range (0-100): {0}")]
    InvalidVolume(i64),

    /// Transcoder subprocess failed to spawn
    #[error("Pipeline spawn error: {0}")]
    PipelineSpawn(String),

    /// Transcoder exited nonzero or reported a decode failure
    #[error("Pipeline decode error: {0}")]
    PipelineDecode(String),

    /// Remote source unreachable or refused
    #[error("Pipeline source error: {0}")]
    PipelineSource(String),

    /// Frame sink failed to deliver; treated like a decode error
    #[error("Sink delivery error: {0}")]
    SinkDelivery(String),

    /// Operation not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the session scheduler may recover by advancing to the next
    /// queue entry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PipelineSpawn(_)
                | Error::PipelineDecode(_)
                | Error::PipelineSource(_)
                | Error::SinkDelivery(_)
        )
    }
}

/// Convenience Result type using the minstrel-vp Error
pub type Result<T> = std::result::Result<T, Error>;
