//! Surge core error types
//!
//! Errors raised by the runtime-agnostic building blocks.

use std::io;
use thiserror::Error;

/// Error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error from the poller or a socket
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The loop owning a wake-queue has stopped consuming
    #[error("Wake queue closed")]
    QueueClosed,
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err = CoreError::from(io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, CoreError::Io(ref e) if e.kind() == io::ErrorKind::Interrupted));
    }

    #[test]
    fn closed_queue_display() {
        assert_eq!(CoreError::QueueClosed.to_string(), "Wake queue closed");
    }
}
