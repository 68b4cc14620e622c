//! Error types for the stream transport.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors that can occur while opening or reading the log stream.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be built or sent.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// A frame could not be read from the response body.
    #[error("frame error: {0}")]
    Frame(#[from] LinesCodecError),

    /// The stream was closed by the server.
    #[error("stream closed by server")]
    Closed,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(ClientError::Status(401).to_string(), "unexpected status 401");
        assert_eq!(ClientError::Closed.to_string(), "stream closed by server");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientError>();
    }
}
