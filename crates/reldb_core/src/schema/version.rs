//! Immutable description of one schema version.

use super::field::{FieldId, TableFieldInfo, IN_KEY_VALUE_MARKER};
use crate::error::{CoreError, CoreResult};
use crate::types::SchemaVersion;
use reldb_codec::{write_str, write_vuint, FieldCodec, KeyReader};

const FIELD_KIND_PRIMARY: u8 = 0;
const FIELD_KIND_VALUE: u8 = 1;

/// A named secondary key of one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryKeyInfo {
    /// Byte identifying the index in the keyspace, stable across versions.
    pub index: u8,
    /// Secondary key name.
    pub name: String,
    /// Declared fields, in key order.
    pub fields: Vec<FieldId>,
}

/// One schema version of a relation.
///
/// The descriptor is persisted once per version and never changes. Rows
/// store the version they were written with, so every stored version must
/// stay loadable.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationVersionInfo {
    version: SchemaVersion,
    primary_fields: Vec<TableFieldInfo>,
    secondary_keys: Vec<SecondaryKeyInfo>,
    value_fields: Vec<TableFieldInfo>,
}

impl RelationVersionInfo {
    /// Creates a version description.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if a secondary key references a
    /// field that does not exist.
    pub fn new(
        version: SchemaVersion,
        primary_fields: Vec<TableFieldInfo>,
        secondary_keys: Vec<SecondaryKeyInfo>,
        value_fields: Vec<TableFieldInfo>,
    ) -> CoreResult<Self> {
        let info = Self {
            version,
            primary_fields,
            secondary_keys,
            value_fields,
        };
        for sk in &info.secondary_keys {
            for id in &sk.fields {
                if info.try_field(*id).is_none() {
                    return Err(CoreError::invalid_schema(format!(
                        "secondary key {} references missing field {id}",
                        sk.name
                    )));
                }
            }
        }
        Ok(info)
    }

    /// The version number.
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Primary key fields in key order, in-key-value fields last.
    #[must_use]
    pub fn primary_fields(&self) -> &[TableFieldInfo] {
        &self.primary_fields
    }

    /// Value fields in storage order.
    #[must_use]
    pub fn value_fields(&self) -> &[TableFieldInfo] {
        &self.value_fields
    }

    /// Secondary keys in declaration order.
    #[must_use]
    pub fn secondary_keys(&self) -> &[SecondaryKeyInfo] {
        &self.secondary_keys
    }

    /// Number of primary key fields that form the row identity.
    #[must_use]
    pub fn identity_len(&self) -> usize {
        self.primary_fields
            .iter()
            .take_while(|f| !f.in_key_value)
            .count()
    }

    /// Looks a field up by position.
    #[must_use]
    pub fn try_field(&self, id: FieldId) -> Option<&TableFieldInfo> {
        match id {
            FieldId::Primary(i) => self.primary_fields.get(i),
            FieldId::Value(i) => self.value_fields.get(i),
        }
    }

    /// Looks a field up by position.
    ///
    /// # Panics
    ///
    /// Panics if the id is out of range; ids come from this version.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &TableFieldInfo {
        match id {
            FieldId::Primary(i) => &self.primary_fields[i],
            FieldId::Value(i) => &self.value_fields[i],
        }
    }

    /// Looks a field up by name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<FieldId> {
        if let Some(i) = self.primary_fields.iter().position(|f| f.name == name) {
            return Some(FieldId::Primary(i));
        }
        self.value_fields
            .iter()
            .position(|f| f.name == name)
            .map(FieldId::Value)
    }

    /// Looks a secondary key up by name.
    #[must_use]
    pub fn secondary_key(&self, name: &str) -> Option<&SecondaryKeyInfo> {
        self.secondary_keys.iter().find(|sk| sk.name == name)
    }

    /// Looks a secondary key up by index byte.
    #[must_use]
    pub fn secondary_key_by_index(&self, index: u8) -> Option<&SecondaryKeyInfo> {
        self.secondary_keys.iter().find(|sk| sk.index == index)
    }

    /// Full field layout of a secondary index entry: the declared fields
    /// followed by the primary key fields the declaration does not cover.
    #[must_use]
    pub fn secondary_key_layout(&self, sk: &SecondaryKeyInfo) -> Vec<FieldId> {
        let mut layout = sk.fields.clone();
        for i in 0..self.primary_fields.len() {
            if !layout.contains(&FieldId::Primary(i)) {
                layout.push(FieldId::Primary(i));
            }
        }
        layout
    }

    /// Returns `true` if some value field can own releasable content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.value_fields.iter().any(|f| f.codec.contains_content())
    }

    /// Serializes the version descriptor.
    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_fields(&mut out, &self.primary_fields);
        write_vuint(&mut out, self.secondary_keys.len() as u64);
        for sk in &self.secondary_keys {
            out.push(sk.index);
            write_str(&mut out, &sk.name);
            write_vuint(&mut out, sk.fields.len() as u64);
            for id in &sk.fields {
                let (kind, pos) = match id {
                    FieldId::Primary(i) => (FIELD_KIND_PRIMARY, *i),
                    FieldId::Value(i) => (FIELD_KIND_VALUE, *i),
                };
                out.push(kind);
                write_vuint(&mut out, pos as u64);
            }
        }
        write_fields(&mut out, &self.value_fields);
        out
    }

    /// Deserializes a version descriptor written by [`save`](Self::save).
    ///
    /// Declared defaults are not persisted; loaded fields have none.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input.
    pub fn load(version: SchemaVersion, bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = KeyReader::new(bytes);
        let primary_fields = read_fields(&mut reader)?;
        let sk_count = reader.read_vuint()?;
        let mut secondary_keys = Vec::new();
        for _ in 0..sk_count {
            let index = reader.read_u8()?;
            let name = reader.read_str()?.to_string();
            let field_count = reader.read_vuint()?;
            let mut fields = Vec::new();
            for _ in 0..field_count {
                let kind = reader.read_u8()?;
                let pos = to_usize(reader.read_vuint()?)?;
                fields.push(match kind {
                    FIELD_KIND_PRIMARY => FieldId::Primary(pos),
                    FIELD_KIND_VALUE => FieldId::Value(pos),
                    other => {
                        return Err(CoreError::invalid_schema(format!(
                            "unknown field kind {other} in secondary key {name}"
                        )))
                    }
                });
            }
            secondary_keys.push(SecondaryKeyInfo {
                index,
                name,
                fields,
            });
        }
        let value_fields = read_fields(&mut reader)?;
        if !reader.is_empty() {
            return Err(CoreError::invalid_schema("trailing bytes in version descriptor"));
        }
        Self::new(version, primary_fields, secondary_keys, value_fields)
    }

    /// Verifies that `self` keeps the primary key of `previous`.
    ///
    /// Field count, codecs and the in-key-value split must be identical;
    /// renaming a key field is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PrimaryKeyChanged`] describing the first difference.
    pub fn check_primary_key(&self, previous: &Self, relation: &str) -> CoreResult<()> {
        if self.primary_fields.len() != previous.primary_fields.len() {
            return Err(CoreError::primary_key_changed(
                relation,
                format!(
                    "field count changed from {} to {}",
                    previous.primary_fields.len(),
                    self.primary_fields.len()
                ),
            ));
        }
        for (new, old) in self.primary_fields.iter().zip(&previous.primary_fields) {
            if new.codec != old.codec || new.in_key_value != old.in_key_value {
                return Err(CoreError::primary_key_changed(
                    relation,
                    format!("field {} changed from {} to {}", new.name, old.codec.name(), new.codec.name()),
                ));
            }
        }
        Ok(())
    }
}

fn to_usize(value: u64) -> CoreResult<usize> {
    usize::try_from(value).map_err(|_| CoreError::invalid_schema("field position overflow"))
}

fn write_fields(out: &mut Vec<u8>, fields: &[TableFieldInfo]) {
    write_vuint(out, fields.len() as u64);
    for field in fields {
        if field.in_key_value {
            write_str(out, &format!("{}{}", field.name, IN_KEY_VALUE_MARKER));
        } else {
            write_str(out, &field.name);
        }
        field.codec.write_descriptor(out);
    }
}

fn read_fields(reader: &mut KeyReader<'_>) -> CoreResult<Vec<TableFieldInfo>> {
    let count = reader.read_vuint()?;
    let mut fields = Vec::new();
    for _ in 0..count {
        let raw = reader.read_str()?;
        let codec = FieldCodec::read_descriptor(reader)?;
        let (name, in_key_value) = match raw.strip_suffix(IN_KEY_VALUE_MARKER) {
            Some(name) => (name, true),
            None => (raw, false),
        };
        fields.push(TableFieldInfo {
            name: name.to_string(),
            codec,
            in_key_value,
            default: None,
        });
    }
    Ok(fields)
}
