//! Materialized rows.

use super::descriptor::RelationDescriptor;
use crate::error::{CoreError, CoreResult};
use reldb_codec::Value;

/// A row as an ordered list of named values.
///
/// Rows read from a relation list the primary key fields first, then the
/// value fields of the current version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field, replacing an existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns the value of a field or a [`CoreError::FieldMismatch`].
    pub fn require(&self, name: &str) -> CoreResult<&Value> {
        self.get(name)
            .ok_or_else(|| CoreError::field_mismatch(format!("row has no field {name}")))
    }

    /// Removes a field and returns its value.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Values in order.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

/// A typed record stored in a relation.
///
/// This is the typed front-end of a relation: it declares the layout and
/// converts between the struct and a [`Row`].
pub trait Record: Sized {
    /// The relation layout.
    fn descriptor() -> RelationDescriptor;

    /// Converts the record into a row.
    fn to_row(&self) -> Row;

    /// Builds the record from a row read from the relation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if a field is missing or has an
    /// unexpected type.
    fn from_row(row: &Row) -> CoreResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut row = Row::new().with("a", 1u64).with("b", "x");
        row.set("a", 2u64);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.get("a"), Some(&Value::Unsigned(2)));
        assert!(row.require("c").is_err());
    }

    #[test]
    fn take_removes() {
        let mut row = Row::new().with("a", true);
        assert_eq!(row.take("a"), Some(Value::Bool(true)));
        assert!(row.is_empty());
    }
}
