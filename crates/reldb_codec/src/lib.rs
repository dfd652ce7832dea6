//! # reldb_codec
//!
//! Field codecs for the reldb relational layer.
//!
//! Rows are mapped onto keys and values field by field. Every codec used in
//! a key is order preserving, so the sorted keyspace of the underlying
//! store is also sorted by field values:
//!
//! - Unsigned integers, ids and counts use a width-prefixed varint
//! - Signed integers and timestamps flip the sign bit of a big-endian word
//! - Floats apply the usual total-order bit transform
//! - Strings and byte strings escape `0x00` and end with `0x00 0x00`
//!
//! ## Usage
//!
//! ```
//! use reldb_codec::{FieldCodec, KeyReader, Value};
//!
//! let codec = FieldCodec::String;
//! let bytes = codec.encode_to_vec(&Value::from("hello")).unwrap();
//!
//! let mut reader = KeyReader::new(&bytes);
//! assert_eq!(codec.decode(&mut reader).unwrap(), Value::from("hello"));
//! assert!(reader.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod reader;
mod value;
mod varint;
mod writer;

pub use codec::{ContentRef, FieldCodec};
pub use error::{CodecError, CodecResult};
pub use reader::KeyReader;
pub use value::Value;
pub use varint::{
    decode_vuint, encode_vuint, vuint_len, vuint_len_from_marker, write_vuint, MAX_VUINT_LEN,
};
pub use writer::{write_blob, write_str};
