//! Positioned reader over encoded keys and values.

use crate::error::{CodecError, CodecResult};
use crate::varint::decode_vuint;

/// A forward-only reader over an encoded byte slice.
///
/// Decoders and constraints share one reader per key so that each field
/// starts where the previous one ended. The position is always a byte
/// offset into the underlying slice, which lets scanners remember field
/// boundaries and resume from them.
#[derive(Debug, Clone, Copy)]
pub struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Creates a reader positioned at `pos`.
    #[must_use]
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    /// Current byte offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The whole underlying slice.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Bytes not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Returns `true` when every byte was consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> CodecResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof)
    }

    /// Consumes one byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Consumes `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Consumes a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Consumes an order-preserving varint.
    pub fn read_vuint(&mut self) -> CodecResult<u64> {
        let (value, len) = decode_vuint(self.remaining())?;
        self.pos += len;
        Ok(value)
    }

    /// Skips `len` bytes.
    pub fn advance(&mut self, len: usize) -> CodecResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Consumes a varint length followed by that many raw bytes.
    ///
    /// This is the descriptor encoding, not the order-preserving one.
    pub fn read_blob(&mut self) -> CodecResult<&'a [u8]> {
        let len = usize::try_from(self.read_vuint()?)
            .map_err(|_| CodecError::invalid_encoding("blob length overflow"))?;
        self.read_bytes(len)
    }

    /// Consumes a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> CodecResult<&'a str> {
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}
