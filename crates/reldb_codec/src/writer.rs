//! Plain (non order-preserving) writers used for schema descriptors.

use crate::varint::write_vuint;

/// Appends a varint length followed by the raw bytes.
pub fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    write_vuint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Appends a length-prefixed UTF-8 string.
pub fn write_str(out: &mut Vec<u8>, value: &str) {
    write_blob(out, value.as_bytes());
}
