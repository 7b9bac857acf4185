//! Top-level error type.

use std::io;
use surge_codec::CodecError;
use surge_core::endpoint::EndpointError;
use surge_core::error::CoreError;
use thiserror::Error;

/// Errors surfaced by `serve`, connection requests and `on_closed`.
#[derive(Debug, Error)]
pub enum Error {
    /// The listen address could not be parsed
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Codec misconfiguration, or a frame that could not be decoded/encoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Core(CoreError),

    /// Invalid option combination
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The loop owning the connection has stopped
    #[error("Event loop has exited")]
    LoopExited,
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::QueueClosed => Self::LoopExited,
            other => Self::Core(other),
        }
    }
}

/// Result type alias for surge operations
pub type Result<T> = std::result::Result<T, Error>;
