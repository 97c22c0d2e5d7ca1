//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("truncated body: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("invalid presence byte: {0:#x}")]
    InvalidPresence(u8),

    #[error("unknown batch op type: {0}")]
    UnknownOpType(u8),

    #[error("batch put op without a value")]
    MissingValue,

    #[error("unknown event kind: {0:?}")]
    UnknownEvent(String),

    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid magic bytes: expected 'MKV1', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the stream is still in sync after this error.
    ///
    /// Recoverable errors affect a single frame whose boundary is known; the
    /// frame is dropped and decoding continues with the next one. Anything
    /// else means frame boundaries are lost and the connection must close.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ProtocolError::InvalidMagic(_) | ProtocolError::FrameTooLarge { .. } | ProtocolError::Io(_)
        )
    }
}
