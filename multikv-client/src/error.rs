//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] multikv_protocol::ProtocolError),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unknown listener: {0}")]
    UnknownListener(u64),
}

impl ClientError {
    /// Classifies an error string carried by a callback.
    pub fn from_remote(message: String) -> Self {
        if message.starts_with("NotFound") {
            ClientError::NotFound(message)
        } else {
            ClientError::Remote(message)
        }
    }

    /// Returns whether the key was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
