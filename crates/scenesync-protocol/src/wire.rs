//! Bounded little-endian field access.
//!
//! [`WireReader`] never reads past the end of its buffer: every accessor
//! checks the remaining length first and reports a [`CodecError::Truncated`]
//! naming the field that did not fit. The `put_*` helpers are the writing
//! counterparts for length-prefixed blocks and assume the caller validated
//! the lengths beforehand.

use bytes::{Buf, BufMut};

use crate::CodecError;

/// Largest value of a `u8` count or length prefix.
pub const MAX_SHORT_LEN: usize = u8::MAX as usize;
/// Largest value of a `u16` length prefix.
pub const MAX_BLOCK_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// WireReader
// ---------------------------------------------------------------------------

/// Cursor over a received payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, field: &'static str, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated {
                field,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        self.require(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        self.require(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.require(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, field: &'static str, len: usize) -> Result<Vec<u8>, CodecError> {
        self.require(field, len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    /// Read a `u8` length prefix followed by that many bytes.
    pub fn read_short_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u8(field)? as usize;
        self.read_bytes(field, len)
    }

    /// Read a `u16` length prefix followed by that many bytes.
    pub fn read_block(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u16(field)? as usize;
        self.read_bytes(field, len)
    }

    /// Consume the reader, failing if any bytes were left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingBytes { remaining }),
        }
    }
}

// ---------------------------------------------------------------------------
// Writing helpers
// ---------------------------------------------------------------------------

/// Fail with [`CodecError::FieldTooLong`] when `len` exceeds `max`.
pub fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), CodecError> {
    if len > max {
        return Err(CodecError::FieldTooLong { field, len, max });
    }
    Ok(())
}

/// Write a `u8` length prefix and the bytes. `bytes.len()` must fit in a `u8`.
pub fn put_short_bytes<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    debug_assert!(bytes.len() <= MAX_SHORT_LEN);
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

/// Write a `u16` length prefix and the bytes. `bytes.len()` must fit in a `u16`.
pub fn put_block<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    debug_assert!(bytes.len() <= MAX_BLOCK_LEN);
    buf.put_u16_le(bytes.len() as u16);
    buf.put_slice(bytes);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
