//! Declaration of a relation's current layout.

use super::field::{FieldId, TableFieldInfo, PRIMARY_KEY};
use super::version::{RelationVersionInfo, SecondaryKeyInfo};
use crate::error::{CoreError, CoreResult};
use crate::types::SchemaVersion;
use reldb_codec::{FieldCodec, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
struct SecondaryKeyDecl {
    name: String,
    fields: Vec<String>,
}

/// The live layout of a relation, as declared by the application.
///
/// Opening a relation turns the descriptor into a [`RelationVersionInfo`];
/// it is persisted as a new version whenever it differs from the latest
/// stored one.
///
/// # Example
///
/// ```
/// use reldb_codec::FieldCodec;
/// use reldb_core::RelationDescriptor;
///
/// let users = RelationDescriptor::new("users")
///     .primary_key("tenant", FieldCodec::Unsigned)
///     .primary_key("id", FieldCodec::Unsigned)
///     .value("name", FieldCodec::String)
///     .secondary_key("by_name", &["name"]);
/// assert_eq!(users.name(), "users");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    name: String,
    primary_fields: Vec<TableFieldInfo>,
    value_fields: Vec<TableFieldInfo>,
    secondary_keys: Vec<SecondaryKeyDecl>,
}

impl RelationDescriptor {
    /// Starts a descriptor for the relation `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_fields: Vec::new(),
            value_fields: Vec::new(),
            secondary_keys: Vec::new(),
        }
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an identity field to the primary key.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>, codec: FieldCodec) -> Self {
        self.primary_fields.push(TableFieldInfo::new(name, codec));
        self
    }

    /// Appends a field stored in the row key that is not part of the row
    /// identity.
    ///
    /// Such fields must follow every identity field. Changing one moves the
    /// row to a new key.
    #[must_use]
    pub fn in_key_value(mut self, name: impl Into<String>, codec: FieldCodec) -> Self {
        let mut field = TableFieldInfo::new(name, codec);
        field.in_key_value = true;
        self.primary_fields.push(field);
        self
    }

    /// Appends a value field.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, codec: FieldCodec) -> Self {
        self.value_fields.push(TableFieldInfo::new(name, codec));
        self
    }

    /// Appends a value field with a declared default, used when rows written
    /// by an older version lack the field.
    #[must_use]
    pub fn value_with_default(
        mut self,
        name: impl Into<String>,
        codec: FieldCodec,
        default: impl Into<Value>,
    ) -> Self {
        let mut field = TableFieldInfo::new(name, codec);
        field.default = Some(default.into());
        self.value_fields.push(field);
        self
    }

    /// Declares a secondary key over the named fields.
    ///
    /// [`PRIMARY_KEY`] may be used as a field name and expands to the
    /// identity fields of the primary key.
    #[must_use]
    pub fn secondary_key(mut self, name: impl Into<String>, fields: &[&str]) -> Self {
        self.secondary_keys.push(SecondaryKeyDecl {
            name: name.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        });
        self
    }

    /// Primary key fields as declared.
    #[must_use]
    pub fn primary_fields(&self) -> &[TableFieldInfo] {
        &self.primary_fields
    }

    /// Value fields as declared.
    #[must_use]
    pub fn value_fields(&self) -> &[TableFieldInfo] {
        &self.value_fields
    }

    /// Resolves the descriptor into a schema version.
    ///
    /// Secondary keys keep the index byte they had in `previous` when their
    /// name and field layout are unchanged; new or changed keys get fresh
    /// index bytes above every byte `previous` uses.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReservedFieldName`] if a field is named
    /// [`PRIMARY_KEY`] and [`CoreError::InvalidSchema`] for any other
    /// malformed declaration.
    pub fn to_version(
        &self,
        version: SchemaVersion,
        previous: Option<&RelationVersionInfo>,
    ) -> CoreResult<RelationVersionInfo> {
        self.validate_fields()?;

        let identity_len = self
            .primary_fields
            .iter()
            .take_while(|f| !f.in_key_value)
            .count();
        let lookup = |name: &str| -> Option<FieldId> {
            if let Some(i) = self.primary_fields.iter().position(|f| f.name == name) {
                return Some(FieldId::Primary(i));
            }
            self.value_fields
                .iter()
                .position(|f| f.name == name)
                .map(FieldId::Value)
        };

        let mut next_index = previous
            .and_then(|p| p.secondary_keys().iter().map(|sk| sk.index).max())
            .map_or(0u16, |max| u16::from(max) + 1);
        let mut names = HashSet::new();
        let mut secondary_keys = Vec::new();
        for decl in &self.secondary_keys {
            if !names.insert(decl.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "secondary key {} declared twice",
                    decl.name
                )));
            }
            let mut fields = Vec::new();
            for name in &decl.fields {
                let ids: Vec<FieldId> = if name == PRIMARY_KEY {
                    (0..identity_len).map(FieldId::Primary).collect()
                } else {
                    vec![lookup(name).ok_or_else(|| {
                        CoreError::invalid_schema(format!(
                            "secondary key {} references unknown field {name}",
                            decl.name
                        ))
                    })?]
                };
                for id in ids {
                    if fields.contains(&id) {
                        return Err(CoreError::invalid_schema(format!(
                            "secondary key {} repeats field {name}",
                            decl.name
                        )));
                    }
                    fields.push(id);
                }
            }
            if fields.is_empty() {
                return Err(CoreError::invalid_schema(format!(
                    "secondary key {} has no fields",
                    decl.name
                )));
            }
            for id in &fields {
                let field = self.field(*id);
                if !field.codec.is_orderable() {
                    return Err(CoreError::invalid_schema(format!(
                        "field {} with codec {} cannot be indexed",
                        field.name,
                        field.codec.name()
                    )));
                }
            }

            let reused = previous.and_then(|p| {
                p.secondary_key(&decl.name)
                    .filter(|old| self.same_fields(&fields, p, &old.fields))
                    .map(|old| old.index)
            });
            let index = match reused {
                Some(index) => index,
                None => {
                    let index = u8::try_from(next_index).map_err(|_| {
                        CoreError::invalid_schema("too many secondary key generations")
                    })?;
                    next_index += 1;
                    index
                }
            };
            secondary_keys.push(SecondaryKeyInfo {
                index,
                name: decl.name.clone(),
                fields,
            });
        }

        RelationVersionInfo::new(
            version,
            self.primary_fields.clone(),
            secondary_keys,
            self.value_fields.clone(),
        )
    }

    fn field(&self, id: FieldId) -> &TableFieldInfo {
        match id {
            FieldId::Primary(i) => &self.primary_fields[i],
            FieldId::Value(i) => &self.value_fields[i],
        }
    }

    fn same_fields(
        &self,
        fields: &[FieldId],
        previous: &RelationVersionInfo,
        old_fields: &[FieldId],
    ) -> bool {
        fields.len() == old_fields.len()
            && fields.iter().zip(old_fields).all(|(new, old)| {
                let (new_field, old_field) = (self.field(*new), previous.field(*old));
                matches!(
                    (new, old),
                    (FieldId::Primary(_), FieldId::Primary(_)) | (FieldId::Value(_), FieldId::Value(_))
                ) && new_field.name == old_field.name
                    && new_field.codec == old_field.codec
            })
    }

    fn validate_fields(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_schema("relation name is empty"));
        }
        if self.primary_fields.is_empty() {
            return Err(CoreError::invalid_schema(format!(
                "relation {} has no primary key",
                self.name
            )));
        }
        let mut seen_in_key_value = false;
        for field in &self.primary_fields {
            if field.in_key_value {
                seen_in_key_value = true;
            } else if seen_in_key_value {
                return Err(CoreError::invalid_schema(format!(
                    "identity field {} follows an in-key-value field",
                    field.name
                )));
            }
            if !field.codec.is_orderable() {
                return Err(CoreError::invalid_schema(format!(
                    "key field {} with codec {} is not orderable",
                    field.name,
                    field.codec.name()
                )));
            }
        }
        if self.primary_fields.iter().all(|f| f.in_key_value) {
            return Err(CoreError::invalid_schema("primary key has no identity field"));
        }

        let mut names = HashSet::new();
        for field in self.primary_fields.iter().chain(&self.value_fields) {
            if field.name == PRIMARY_KEY {
                return Err(CoreError::ReservedFieldName {
                    name: field.name.clone(),
                });
            }
            if field.name.is_empty() || field.name.ends_with(super::field::IN_KEY_VALUE_MARKER) {
                return Err(CoreError::invalid_schema(format!(
                    "invalid field name {:?}",
                    field.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "field {} declared twice",
                    field.name
                )));
            }
            if let Some(default) = &field.default {
                field.codec.coerce(default.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> RelationDescriptor {
        RelationDescriptor::new("users")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .value("age", FieldCodec::Unsigned)
            .secondary_key("by_name", &["name"])
    }

    #[test]
    fn resolves_fields_and_indexes() {
        let info = users().to_version(SchemaVersion::FIRST, None).unwrap();
        let sk = info.secondary_key("by_name").unwrap();
        assert_eq!(sk.index, 0);
        assert_eq!(sk.fields, vec![FieldId::Value(0)]);
        assert_eq!(info.identity_len(), 2);
    }

    #[test]
    fn primary_key_token_expands_to_identity() {
        let info = users()
            .in_key_value("region", FieldCodec::String)
            .secondary_key("by_age", &["age", PRIMARY_KEY])
            .to_version(SchemaVersion::FIRST, None)
            .unwrap();
        let sk = info.secondary_key("by_age").unwrap();
        assert_eq!(
            sk.fields,
            vec![FieldId::Value(1), FieldId::Primary(0), FieldId::Primary(1)]
        );
        assert_eq!(sk.index, 1);
    }

    #[test]
    fn reserved_name_is_rejected() {
        let err = users()
            .value(PRIMARY_KEY, FieldCodec::Bool)
            .to_version(SchemaVersion::FIRST, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedFieldName { .. }));
    }

    #[test]
    fn index_bytes_are_stable_and_fresh() {
        let v1 = users()
            .secondary_key("by_age", &["age"])
            .to_version(SchemaVersion::FIRST, None)
            .unwrap();
        let v2 = RelationDescriptor::new("users")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .value("age", FieldCodec::Signed)
            .secondary_key("by_age", &["age"])
            .secondary_key("by_name", &["name"])
            .to_version(SchemaVersion::new(2), Some(&v1))
            .unwrap();
        assert_eq!(v2.secondary_key("by_name").unwrap().index, 0);
        // codec changed, so the entries differ and need a new index byte
        assert_eq!(v2.secondary_key("by_age").unwrap().index, 2);
    }

    #[test]
    fn malformed_declarations() {
        let no_pk = RelationDescriptor::new("t").value("a", FieldCodec::Bool);
        assert!(no_pk.to_version(SchemaVersion::FIRST, None).is_err());

        let misplaced = RelationDescriptor::new("t")
            .in_key_value("a", FieldCodec::Bool)
            .primary_key("b", FieldCodec::Bool);
        assert!(misplaced.to_version(SchemaVersion::FIRST, None).is_err());

        let list_key = RelationDescriptor::new("t")
            .primary_key("a", FieldCodec::list(FieldCodec::Bool));
        assert!(list_key.to_version(SchemaVersion::FIRST, None).is_err());

        let twice = users().value("name", FieldCodec::Bool);
        assert!(twice.to_version(SchemaVersion::FIRST, None).is_err());

        let unknown = users().secondary_key("x", &["missing"]);
        assert!(unknown.to_version(SchemaVersion::FIRST, None).is_err());

        let bad_default = users().value_with_default("n", FieldCodec::Unsigned, "x");
        assert!(bad_default.to_version(SchemaVersion::FIRST, None).is_err());
    }
}
