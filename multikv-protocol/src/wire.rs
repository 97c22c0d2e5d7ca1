//! Field-level encoding shared by every message body.
//!
//! ```text
//! uint      LEB128 varint, at most 10 bytes
//! bytes     uint length, then the raw bytes
//! string    bytes holding UTF-8
//! optional  presence byte (0 = absent, 1 = present), then the field
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum encoded length of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

pub fn put_uint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_uint(buf, value.len() as u64);
    buf.put_slice(value);
}

pub fn put_opt_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(v) => {
            buf.put_u8(1);
            put_bytes(buf, v);
        }
        None => buf.put_u8(0),
    }
}

pub fn put_opt_str(buf: &mut BytesMut, value: Option<&str>) {
    put_opt_bytes(buf, value.map(str::as_bytes));
}

/// Cursor over a message body.
///
/// Byte fields are split off the underlying buffer without copying.
pub struct BodyReader {
    buf: Bytes,
}

impl BodyReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn uint(&mut self) -> Result<u64, ProtocolError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8()?;
            let shift = 7 * i as u32;
            // The tenth byte may only carry the single remaining bit.
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(ProtocolError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::VarintOverflow)
    }

    pub fn bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.uint()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::Truncated { needed: usize::MAX })?;
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn presence(&mut self) -> Result<bool, ProtocolError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidPresence(other)),
        }
    }

    pub fn opt_bytes(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.presence()? {
            self.bytes().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_string(&mut self) -> Result<Option<String>, ProtocolError> {
        if self.presence()? {
            self.string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fails unless the whole body was consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}
