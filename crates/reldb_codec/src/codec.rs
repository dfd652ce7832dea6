//! Per-field codecs.
//!
//! Every codec used in a key produces an order-preserving encoding: the
//! bytewise order of two encodings equals the order of the values. This
//! is what allows the scanner to evaluate range constraints on raw key
//! bytes without decoding them.

use crate::error::{CodecError, CodecResult};
use crate::reader::KeyReader;
use crate::value::Value;
use crate::varint::write_vuint;
use crate::writer::{write_blob, write_str};

const SIGN_BIT: u64 = 1 << 63;
const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// Identifier of content owned by a row and released with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentRef {
    /// An owned dictionary.
    Dictionary(u64),
    /// An owned object.
    Object(u64),
}

/// Codec of a single field.
///
/// The codec is recorded in every schema version by its
/// [`name`](FieldCodec::name) and [`configuration`](FieldCodec::configuration)
/// bytes, so a stored version can be turned back into a codec with
/// [`FieldCodec::from_descriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldCodec {
    /// Unsigned integer as an order-preserving varint.
    Unsigned,
    /// Signed integer, 8 bytes big endian with the sign bit flipped.
    Signed,
    /// One byte, `0` or `1`.
    Bool,
    /// Microseconds since the Unix epoch, encoded like [`FieldCodec::Signed`].
    DateTime,
    /// IEEE 754 double with the total-order transform.
    Float,
    /// UTF-8 text, zero bytes escaped, terminated by `0x00 0x00`.
    String,
    /// Raw bytes with the same escaping as text.
    Bytes,
    /// `0x00` for none, `0x01` followed by the inner encoding otherwise.
    Optional(Box<FieldCodec>),
    /// Item count followed by the items. Not usable in keys.
    List(Box<FieldCodec>),
    /// Identifier of an owned dictionary.
    Dictionary,
    /// Identifier of an owned object.
    Object,
}

impl FieldCodec {
    /// Shorthand for `FieldCodec::Optional(Box::new(inner))`.
    #[must_use]
    pub fn optional(inner: FieldCodec) -> Self {
        FieldCodec::Optional(Box::new(inner))
    }

    /// Shorthand for `FieldCodec::List(Box::new(inner))`.
    #[must_use]
    pub fn list(inner: FieldCodec) -> Self {
        FieldCodec::List(Box::new(inner))
    }

    /// Stable codec name stored in version descriptors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            FieldCodec::Unsigned => "VUInt",
            FieldCodec::Signed => "VInt",
            FieldCodec::Bool => "Bool",
            FieldCodec::DateTime => "DateTime",
            FieldCodec::Float => "Double",
            FieldCodec::String => "String",
            FieldCodec::Bytes => "Bytes",
            FieldCodec::Optional(_) => "Optional",
            FieldCodec::List(_) => "List",
            FieldCodec::Dictionary => "Dictionary",
            FieldCodec::Object => "Object",
        }
    }

    /// Configuration bytes stored next to the name.
    ///
    /// Wrapping codecs store the descriptor of their inner codec; all
    /// other codecs have an empty configuration.
    #[must_use]
    pub fn configuration(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let FieldCodec::Optional(inner) | FieldCodec::List(inner) = self {
            inner.write_descriptor(&mut out);
        }
        out
    }

    /// Appends `name` and `configuration` in descriptor form.
    pub fn write_descriptor(&self, out: &mut Vec<u8>) {
        write_str(out, self.name());
        write_blob(out, &self.configuration());
    }

    /// Reads a codec written by [`write_descriptor`](Self::write_descriptor).
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input or an unknown codec name.
    pub fn read_descriptor(reader: &mut KeyReader<'_>) -> CodecResult<Self> {
        let name = reader.read_str()?;
        let config = reader.read_blob()?;
        Self::from_descriptor(name, config)
    }

    /// Rebuilds a codec from its stored name and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownCodec`] for an unknown name.
    pub fn from_descriptor(name: &str, config: &[u8]) -> CodecResult<Self> {
        let inner = || -> CodecResult<Box<FieldCodec>> {
            let mut reader = KeyReader::new(config);
            Ok(Box::new(Self::read_descriptor(&mut reader)?))
        };
        Ok(match name {
            "VUInt" => FieldCodec::Unsigned,
            "VInt" => FieldCodec::Signed,
            "Bool" => FieldCodec::Bool,
            "DateTime" => FieldCodec::DateTime,
            "Double" => FieldCodec::Float,
            "String" => FieldCodec::String,
            "Bytes" => FieldCodec::Bytes,
            "Optional" => FieldCodec::Optional(inner()?),
            "List" => FieldCodec::List(inner()?),
            "Dictionary" => FieldCodec::Dictionary,
            "Object" => FieldCodec::Object,
            other => return Err(CodecError::unknown_codec(other)),
        })
    }

    /// Returns `true` if the codec may be used in primary or secondary keys.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        match self {
            FieldCodec::List(_) | FieldCodec::Dictionary | FieldCodec::Object => false,
            FieldCodec::Optional(inner) => inner.is_orderable(),
            _ => true,
        }
    }

    /// Returns `true` if [`encode_prefix`](Self::encode_prefix) is supported.
    #[must_use]
    pub fn supports_prefix(&self) -> bool {
        match self {
            FieldCodec::String | FieldCodec::Bytes => true,
            FieldCodec::Optional(inner) => inner.supports_prefix(),
            _ => false,
        }
    }

    /// Appends the encoding of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] when the value does not fit.
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
        match (self, value) {
            (FieldCodec::Unsigned, Value::Unsigned(v))
            | (FieldCodec::Dictionary, Value::Dictionary(v))
            | (FieldCodec::Object, Value::Object(v)) => write_vuint(out, *v),
            (FieldCodec::Signed, Value::Signed(v))
            | (FieldCodec::DateTime, Value::DateTime(v) | Value::Signed(v)) => {
                write_signed(out, *v);
            }
            (FieldCodec::Bool, Value::Bool(v)) => out.push(u8::from(*v)),
            (FieldCodec::Float, Value::Float(v)) => write_float(out, *v),
            (FieldCodec::String, Value::Text(v)) => {
                write_escaped(out, v.as_bytes());
                out.extend_from_slice(&[ESCAPE, TERMINATOR]);
            }
            (FieldCodec::Bytes, Value::Bytes(v)) => {
                write_escaped(out, v);
                out.extend_from_slice(&[ESCAPE, TERMINATOR]);
            }
            (FieldCodec::Optional(_), Value::Null) => out.push(0x00),
            (FieldCodec::Optional(inner), value) => {
                out.push(0x01);
                inner.encode(value, out)?;
            }
            (FieldCodec::List(inner), Value::List(items)) => {
                write_vuint(out, items.len() as u64);
                for item in items {
                    inner.encode(item, out)?;
                }
            }
            (codec, value) => return Err(CodecError::type_mismatch(codec.name(), value.kind())),
        }
        Ok(())
    }

    /// Returns the encoding of `value` in a fresh buffer.
    pub fn encode_to_vec(&self, value: &Value) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(value, &mut out)?;
        Ok(out)
    }

    /// Appends an encoding that every encoding of a value starting with
    /// `value` begins with.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedPrefix`] for codecs without a prefix
    /// encoding and [`CodecError::TypeMismatch`] for ill-typed values.
    pub fn encode_prefix(&self, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
        match (self, value) {
            (FieldCodec::String, Value::Text(v)) => write_escaped(out, v.as_bytes()),
            (FieldCodec::Bytes, Value::Bytes(v)) => write_escaped(out, v),
            (FieldCodec::Optional(inner), value) if !value.is_null() => {
                out.push(0x01);
                inner.encode_prefix(value, out)?;
            }
            (codec, _) if !codec.supports_prefix() => {
                return Err(CodecError::unsupported_prefix(codec.name()))
            }
            (codec, value) => return Err(CodecError::type_mismatch(codec.name(), value.kind())),
        }
        Ok(())
    }

    /// Decodes one value, advancing the reader past it.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or malformed input.
    pub fn decode(&self, reader: &mut KeyReader<'_>) -> CodecResult<Value> {
        Ok(match self {
            FieldCodec::Unsigned => Value::Unsigned(reader.read_vuint()?),
            FieldCodec::Signed => Value::Signed(read_signed(reader)?),
            FieldCodec::DateTime => Value::DateTime(read_signed(reader)?),
            FieldCodec::Bool => match reader.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(CodecError::invalid_encoding(format!(
                        "invalid bool byte {other}"
                    )))
                }
            },
            FieldCodec::Float => Value::Float(read_float(reader)?),
            FieldCodec::String => {
                let bytes = read_escaped(reader)?;
                Value::Text(String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?)
            }
            FieldCodec::Bytes => Value::Bytes(read_escaped(reader)?),
            FieldCodec::Optional(inner) => match reader.read_u8()? {
                0x00 => Value::Null,
                0x01 => inner.decode(reader)?,
                other => {
                    return Err(CodecError::invalid_encoding(format!(
                        "invalid optional tag {other}"
                    )))
                }
            },
            FieldCodec::List(inner) => {
                let count = reader.read_vuint()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(inner.decode(reader)?);
                }
                Value::List(items)
            }
            FieldCodec::Dictionary => Value::Dictionary(reader.read_vuint()?),
            FieldCodec::Object => Value::Object(reader.read_vuint()?),
        })
    }

    /// Advances the reader past one encoded value without materializing it.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or malformed input.
    pub fn skip(&self, reader: &mut KeyReader<'_>) -> CodecResult<()> {
        match self {
            FieldCodec::Unsigned | FieldCodec::Dictionary | FieldCodec::Object => {
                reader.read_vuint().map(|_| ())
            }
            FieldCodec::Signed | FieldCodec::DateTime | FieldCodec::Float => reader.advance(8),
            FieldCodec::Bool => reader.advance(1),
            FieldCodec::String | FieldCodec::Bytes => {
                let len = escaped_len(reader.remaining())?;
                reader.advance(len)
            }
            FieldCodec::Optional(inner) => match reader.read_u8()? {
                0x00 => Ok(()),
                _ => inner.skip(reader),
            },
            FieldCodec::List(inner) => {
                let count = reader.read_vuint()?;
                for _ in 0..count {
                    inner.skip(reader)?;
                }
                Ok(())
            }
        }
    }

    /// Value a field takes when it is missing from stored data.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            FieldCodec::Unsigned => Value::Unsigned(0),
            FieldCodec::Signed => Value::Signed(0),
            FieldCodec::Bool => Value::Bool(false),
            FieldCodec::DateTime => Value::DateTime(0),
            FieldCodec::Float => Value::Float(0.0),
            FieldCodec::String => Value::Text(String::new()),
            FieldCodec::Bytes => Value::Bytes(Vec::new()),
            FieldCodec::Optional(_) => Value::Null,
            FieldCodec::List(_) => Value::List(Vec::new()),
            FieldCodec::Dictionary => Value::Dictionary(0),
            FieldCodec::Object => Value::Object(0),
        }
    }

    /// Normalizes a caller supplied value to the variant this codec encodes.
    ///
    /// Integer literals are accepted for any integer-like codec as long as
    /// they fit.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] when no lossless normalization exists.
    pub fn coerce(&self, value: Value) -> CodecResult<Value> {
        let mismatch = |value: &Value| CodecError::type_mismatch(self.name(), value.kind());
        Ok(match (self, value) {
            (FieldCodec::Unsigned, Value::Signed(v)) => {
                Value::Unsigned(u64::try_from(v).map_err(|_| mismatch(&Value::Signed(v)))?)
            }
            (FieldCodec::Signed, Value::Unsigned(v)) => {
                Value::Signed(i64::try_from(v).map_err(|_| mismatch(&Value::Unsigned(v)))?)
            }
            (FieldCodec::DateTime, Value::Signed(v)) => Value::DateTime(v),
            (FieldCodec::Float, Value::Signed(v)) => Value::Float(v as f64),
            (FieldCodec::Float, Value::Unsigned(v)) => Value::Float(v as f64),
            (FieldCodec::Dictionary, Value::Unsigned(v)) => Value::Dictionary(v),
            (FieldCodec::Object, Value::Unsigned(v)) => Value::Object(v),
            (FieldCodec::Optional(_), Value::Null) => Value::Null,
            (FieldCodec::Optional(inner), value) => inner.coerce(value)?,
            (FieldCodec::List(inner), Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .map(|item| inner.coerce(item))
                    .collect::<CodecResult<_>>()?,
            ),
            (codec, value) if codec.accepts(&value) => value,
            (_, value) => return Err(mismatch(&value)),
        })
    }

    /// Returns `true` if `value` can be encoded as is.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldCodec::Unsigned, Value::Unsigned(_))
            | (FieldCodec::Signed, Value::Signed(_))
            | (FieldCodec::Bool, Value::Bool(_))
            | (FieldCodec::DateTime, Value::DateTime(_))
            | (FieldCodec::Float, Value::Float(_))
            | (FieldCodec::String, Value::Text(_))
            | (FieldCodec::Bytes, Value::Bytes(_))
            | (FieldCodec::Optional(_), Value::Null)
            | (FieldCodec::Dictionary, Value::Dictionary(_))
            | (FieldCodec::Object, Value::Object(_)) => true,
            (FieldCodec::Optional(inner), value) => inner.accepts(value),
            (FieldCodec::List(inner), Value::List(items)) => items.iter().all(|i| inner.accepts(i)),
            _ => false,
        }
    }

    /// Returns `true` if data stored with `old` can be loaded with `self`.
    #[must_use]
    pub fn can_convert_from(&self, old: &FieldCodec) -> bool {
        if self == old {
            return true;
        }
        match (old, self) {
            (FieldCodec::Unsigned, FieldCodec::Signed | FieldCodec::Float)
            | (FieldCodec::Signed, FieldCodec::Float) => true,
            (FieldCodec::Optional(old), FieldCodec::Optional(new)) => new.can_convert_from(old),
            (old, FieldCodec::Optional(new)) => new.can_convert_from(old),
            _ => false,
        }
    }

    /// Converts a value decoded with `old` into a value of this codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::IncompatibleConversion`] when the codecs are
    /// not convertible or the value does not fit.
    pub fn convert(&self, old: &FieldCodec, value: Value) -> CodecResult<Value> {
        if self == old {
            return Ok(value);
        }
        let incompatible = || CodecError::incompatible(old.name(), self.name());
        match (old, self, value) {
            (FieldCodec::Unsigned, FieldCodec::Signed, Value::Unsigned(v)) => {
                Ok(Value::Signed(i64::try_from(v).map_err(|_| incompatible())?))
            }
            (FieldCodec::Unsigned, FieldCodec::Float, Value::Unsigned(v)) => {
                Ok(Value::Float(v as f64))
            }
            (FieldCodec::Signed, FieldCodec::Float, Value::Signed(v)) => Ok(Value::Float(v as f64)),
            (FieldCodec::Optional(_), FieldCodec::Optional(_), Value::Null) => Ok(Value::Null),
            (FieldCodec::Optional(old), FieldCodec::Optional(new), value) => new.convert(old, value),
            (old, FieldCodec::Optional(new), value) => new.convert(old, value),
            _ => Err(incompatible()),
        }
    }

    /// Returns `true` if values of this codec can own releasable content.
    #[must_use]
    pub fn contains_content(&self) -> bool {
        match self {
            FieldCodec::Dictionary | FieldCodec::Object => true,
            FieldCodec::Optional(inner) | FieldCodec::List(inner) => inner.contains_content(),
            _ => false,
        }
    }

    /// Reads one encoded value and collects the content it owns.
    ///
    /// Unallocated identifiers (`0`) are not reported.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or malformed input.
    pub fn collect_content(
        &self,
        reader: &mut KeyReader<'_>,
        out: &mut Vec<ContentRef>,
    ) -> CodecResult<()> {
        match self {
            FieldCodec::Dictionary => {
                let id = reader.read_vuint()?;
                if id != 0 {
                    out.push(ContentRef::Dictionary(id));
                }
                Ok(())
            }
            FieldCodec::Object => {
                let id = reader.read_vuint()?;
                if id != 0 {
                    out.push(ContentRef::Object(id));
                }
                Ok(())
            }
            FieldCodec::Optional(inner) => match reader.read_u8()? {
                0x00 => Ok(()),
                _ => inner.collect_content(reader, out),
            },
            FieldCodec::List(inner) => {
                let count = reader.read_vuint()?;
                for _ in 0..count {
                    inner.collect_content(reader, out)?;
                }
                Ok(())
            }
            other => other.skip(reader),
        }
    }
}

fn write_signed(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&((v as u64) ^ SIGN_BIT).to_be_bytes());
}

fn read_signed(reader: &mut KeyReader<'_>) -> CodecResult<i64> {
    let raw = u64::from_be_bytes(reader.read_array::<8>()?);
    Ok((raw ^ SIGN_BIT) as i64)
}

fn write_float(out: &mut Vec<u8>, v: f64) {
    let bits = v.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    out.extend_from_slice(&ordered.to_be_bytes());
}

fn read_float(reader: &mut KeyReader<'_>) -> CodecResult<f64> {
    let ordered = u64::from_be_bytes(reader.read_array::<8>()?);
    let bits = if ordered & SIGN_BIT != 0 {
        ordered ^ SIGN_BIT
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}

fn write_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == ESCAPE {
            out.extend_from_slice(&[ESCAPE, ESCAPED_ZERO]);
        } else {
            out.push(b);
        }
    }
}

fn read_escaped(reader: &mut KeyReader<'_>) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = reader.read_u8()?;
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match reader.read_u8()? {
            TERMINATOR => return Ok(out),
            ESCAPED_ZERO => out.push(0),
            other => {
                return Err(CodecError::invalid_encoding(format!(
                    "invalid escape byte {other}"
                )))
            }
        }
    }
}

/// Length of an escaped encoding including its terminator.
fn escaped_len(bytes: &[u8]) -> CodecResult<usize> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE {
            match bytes.get(i + 1) {
                Some(&TERMINATOR) => return Ok(i + 2),
                Some(_) => i += 2,
                None => break,
            }
        } else {
            i += 1;
        }
    }
    Err(CodecError::UnexpectedEof)
}
