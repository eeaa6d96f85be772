//! Error types for the FinishLine boundary layer.

use thiserror::Error;

/// Errors raised by detection sources.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The underlying capture device or file failed
    #[error("Source error: {0}")]
    SourceError(String),

    /// A frame could not be decoded into detections
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frames arrived with a timestamp earlier than the previous frame
    #[error("Frame timestamp went backwards: {previous:.3}s -> {current:.3}s")]
    TimeWentBackwards { previous: f64, current: f64 },
}

impl EnvError {
    /// Creates a source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::SourceError(msg.into())
    }

    /// Creates a malformed-frame error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }
}
