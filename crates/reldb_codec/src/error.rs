//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or converting fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A value does not fit the codec it is encoded with.
    #[error("codec {codec} cannot encode {found}")]
    TypeMismatch {
        /// Name of the codec.
        codec: String,
        /// Kind of the offending value.
        found: String,
    },

    /// A codec name read from a descriptor is not known.
    #[error("unknown codec: {name}")]
    UnknownCodec {
        /// The unknown codec name.
        name: String,
    },

    /// Malformed encoded bytes.
    #[error("invalid encoding: {message}")]
    InvalidEncoding {
        /// Description of the problem.
        message: String,
    },

    /// The codec does not support prefix encoding.
    #[error("codec {codec} has no prefix encoding")]
    UnsupportedPrefix {
        /// Name of the codec.
        codec: String,
    },

    /// Stored data cannot be converted between two codecs.
    #[error("cannot convert {from} to {to}")]
    IncompatibleConversion {
        /// Source codec name.
        from: String,
        /// Target codec name.
        to: String,
    },
}

impl CodecError {
    /// Create a type mismatch error.
    pub fn type_mismatch(codec: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            codec: codec.into(),
            found: found.into(),
        }
    }

    /// Create an unknown codec error.
    pub fn unknown_codec(name: impl Into<String>) -> Self {
        Self::UnknownCodec { name: name.into() }
    }

    /// Create an invalid encoding error.
    pub fn invalid_encoding(message: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            message: message.into(),
        }
    }

    /// Create an unsupported prefix error.
    pub fn unsupported_prefix(codec: impl Into<String>) -> Self {
        Self::UnsupportedPrefix {
            codec: codec.into(),
        }
    }

    /// Create an incompatible conversion error.
    pub fn incompatible(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::IncompatibleConversion {
            from: from.into(),
            to: to.into(),
        }
    }
}
