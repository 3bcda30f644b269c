//! Error types for slotsync-client

use std::time::Duration;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum Error {
    /// The server sent a record that disagrees with the local mirror
    #[error("Protocol error: {0}")]
    Protocol(#[from] slotsync_core::Error),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Connection refused, reset or closed unexpectedly
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection attempt did not finish in time
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The transport closed before or during the session
    #[error("Connection closed")]
    Closed,

    /// An error record from the server
    #[error("Server error ({error_type}): {message}")]
    Server {
        error_type: String,
        message: String,
        retryable: bool,
    },

    /// Configuration could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// Configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the session should reconnect after this error
    ///
    /// Protocol and codec errors are fatal for the message that caused them,
    /// but a fresh connection starts again from a full checkout, so they
    /// retry too.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Protocol(_)
            | Error::Codec(_)
            | Error::Transport(_)
            | Error::ConnectTimeout(_)
            | Error::Closed => true,
            Error::Server { retryable, .. } => *retryable,
            Error::Io(_) | Error::Ron(_) | Error::InvalidConfig(_) => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_taxonomy() {
        assert!(Error::Closed.is_retryable());
        assert!(Error::ConnectTimeout(Duration::from_secs(1)).is_retryable());
        assert!(Error::Protocol(slotsync_core::Error::NotCheckedOut).is_retryable());
        assert!(Error::Server {
            error_type: "overloaded".into(),
            message: "try later".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!Error::Server {
            error_type: "auth".into(),
            message: "bad token".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!Error::InvalidConfig("url".into()).is_retryable());
    }
}
