//! # multikv-protocol
//!
//! Wire protocol for multikv, the remote key-value store RPC.
//!
//! This crate provides:
//! - The request and response tag tables and message bodies
//! - Compact field encoding (varints, length-prefixed bytes, optionals)
//! - Self-describing change-event payloads for subscriptions
//! - Length-prefixed, CRC32C-checked transport framing

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod wire;

pub use codec::{Decoded, Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE, MAGIC};
pub use message::{
    BatchOp, Callback, ChangeEvent, EventKind, IteratorData, IteratorOptions, Request,
    RequestKind, Response, ResponseKind,
};

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Default port for the multikv server.
pub const DEFAULT_PORT: u16 = 7420;
