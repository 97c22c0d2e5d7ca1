//! Server error types.

use thiserror::Error;

/// Errors that end a connection or stop the server.
///
/// Store failures for individual requests never surface here; they are
/// answered to the peer as error callbacks.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] multikv_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] multikv_store::StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Whether the connection ended because the server is stopping.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ServerError::ShuttingDown)
    }
}
