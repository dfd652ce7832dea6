//! Order-preserving variable-length unsigned integers.
//!
//! The first byte selects the width, so the bytewise order of encodings
//! equals the numeric order of the values. Relation ids, schema versions,
//! object ids, list lengths and `VUInt` fields all use this encoding.
//!
//! | Value range                | Bytes | Layout                              |
//! |----------------------------|-------|-------------------------------------|
//! | 0 - 240                    | 1     | `[v]`                               |
//! | 241 - 2287                 | 2     | `[241 + (v - 240) >> 8, low byte]`  |
//! | 2288 - 67823               | 3     | `[249, (v - 2288) as u16 BE]`       |
//! | 67824 - 0xFF_FFFF          | 4     | `[250, v as u24 BE]`                |
//! | 0x100_0000 - 0xFFFF_FFFF   | 5     | `[251, v as u32 BE]`                |
//! | above                      | 9     | `[255, v as u64 BE]`                |
//!
//! Markers 252-254 are never produced and are rejected by the decoder.

use crate::error::{CodecError, CodecResult};

/// Largest encoded length of a varint.
pub const MAX_VUINT_LEN: usize = 9;

/// Returns the encoded length of `value`.
#[must_use]
pub fn vuint_len(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else if value <= 0xFF_FFFF {
        4
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Appends the encoding of `value` to `out`.
#[allow(clippy::cast_possible_truncation)]
pub fn write_vuint(out: &mut Vec<u8>, value: u64) {
    if value <= 240 {
        out.push(value as u8);
    } else if value <= 2287 {
        let v = value - 240;
        out.push(((v >> 8) + 241) as u8);
        out.push(v as u8);
    } else if value <= 67823 {
        let v = value - 2288;
        out.push(249);
        out.push((v >> 8) as u8);
        out.push(v as u8);
    } else if value <= 0xFF_FFFF {
        out.push(250);
        out.extend_from_slice(&value.to_be_bytes()[5..]);
    } else if value <= 0xFFFF_FFFF {
        out.push(251);
        out.extend_from_slice(&value.to_be_bytes()[4..]);
    } else {
        out.push(255);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Returns `value` encoded into a fresh buffer.
#[must_use]
pub fn encode_vuint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(vuint_len(value));
    write_vuint(&mut out, value);
    out
}

/// Returns the encoded length announced by a marker byte.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEncoding`] for the reserved markers.
pub fn vuint_len_from_marker(marker: u8) -> CodecResult<usize> {
    match marker {
        0..=240 => Ok(1),
        241..=248 => Ok(2),
        249 => Ok(3),
        250 => Ok(4),
        251 => Ok(5),
        255 => Ok(9),
        _ => Err(CodecError::invalid_encoding(format!(
            "invalid varint marker: {marker}"
        ))),
    }
}

/// Decodes a varint from the start of `buf`, returning the value and the
/// number of bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] on truncated input and
/// [`CodecError::InvalidEncoding`] on a reserved marker.
pub fn decode_vuint(buf: &[u8]) -> CodecResult<(u64, usize)> {
    let first = *buf.first().ok_or(CodecError::UnexpectedEof)?;
    let len = vuint_len_from_marker(first)?;
    if buf.len() < len {
        return Err(CodecError::UnexpectedEof);
    }
    let tail = |from: usize| {
        buf[from..len]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    };
    let value = match len {
        1 => u64::from(first),
        2 => 240 + ((u64::from(first) - 241) << 8) + u64::from(buf[1]),
        3 => 2288 + tail(1),
        _ => tail(1),
    };
    Ok((value, len))
}
