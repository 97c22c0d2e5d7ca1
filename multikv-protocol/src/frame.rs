//! Transport framing: preserves message boundaries over a byte stream.
//!
//! Frame layout (12 bytes header + payload):
//!
//! ```text
//! +---------+-------------+---------+---------------------+
//! | magic   | payload_len | crc32c  | payload             |
//! | 4 bytes | 4 bytes     | 4 bytes | payload_len bytes   |
//! +---------+-------------+---------+---------------------+
//! ```
//!
//! The payload is one tagged message (see [`crate::message`]).

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes identifying multikv frames: "MKV1"
pub const MAGIC: [u8; 4] = *b"MKV1";

/// Size of the fixed frame header in bytes (4+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// A whole frame as read off the transport.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        Self::encode_into(&self.payload, &mut buf)?;
        Ok(buf)
    }

    /// Appends a framed payload to `buf`.
    pub fn encode_into(payload: &[u8], buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u32(payload_len);
        buf.put_u32(crc32c::crc32c(payload));
        buf.put_slice(payload);
        Ok(())
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// A CRC mismatch consumes the bad frame, so decoding may resume.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let crc_expected = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(ProtocolError::CrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self { payload }))
    }
}
