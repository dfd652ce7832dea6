//! Field descriptions.

use reldb_codec::{FieldCodec, Value};
use std::fmt;

/// Name of the primary-key self reference.
///
/// Inside a secondary key definition it expands to every identity field of
/// the primary key. No field may use this name.
pub const PRIMARY_KEY: &str = "__primary_key";

/// Suffix marking in-key-value fields in stored descriptors.
pub(crate) const IN_KEY_VALUE_MARKER: char = '@';

/// One field of a schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFieldInfo {
    /// Field name, unique within the relation.
    pub name: String,
    /// Codec of the field.
    pub codec: FieldCodec,
    /// Stored in the row key without being part of the row identity.
    pub in_key_value: bool,
    /// Value used when stored data lacks the field.
    pub default: Option<Value>,
}

impl TableFieldInfo {
    /// Creates a field without a declared default.
    #[must_use]
    pub fn new(name: impl Into<String>, codec: FieldCodec) -> Self {
        Self {
            name: name.into(),
            codec,
            in_key_value: false,
            default: None,
        }
    }

    /// Value this field takes when it is missing from stored data.
    #[must_use]
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.codec.default_value())
    }

    /// Returns `true` if both fields store identical bytes.
    #[must_use]
    pub fn same_layout(&self, other: &TableFieldInfo) -> bool {
        self.name == other.name && self.codec == other.codec && self.in_key_value == other.in_key_value
    }
}

/// Position of a field within a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    /// Index into the primary key fields.
    Primary(usize),
    /// Index into the value fields.
    Value(usize),
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Primary(i) => write!(f, "pk[{i}]"),
            FieldId::Value(i) => write!(f, "value[{i}]"),
        }
    }
}
