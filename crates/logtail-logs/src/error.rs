//! Error types for the log tail subsystem.

use thiserror::Error;

/// Errors that can occur in the log tail subsystem.
///
/// Classification never fails and persistence failures are logged rather
/// than returned, so these mostly surface from store backends and from
/// control calls made after shutdown.
#[derive(Debug, Error)]
pub enum LogTailError {
    /// An I/O error occurred in a store backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No directory could be determined for the session store.
    #[error("no cache directory available for the session store")]
    NoStoreDir,

    /// The stream controller has shut down.
    #[error("stream controller is not running")]
    ControllerGone,

    /// A client-side filter pattern failed to compile.
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] regex::Error),
}

/// Result type alias for log tail operations.
pub type Result<T> = std::result::Result<T, LogTailError>;
