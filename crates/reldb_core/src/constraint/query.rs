//! Binding constraints to key fields.

use super::{Constraint, MatchType};
use crate::error::{CoreError, CoreResult};
use crate::relation::RelationInfo;
use crate::schema::SecondaryKeyInfo;
use reldb_codec::FieldCodec;

/// Keyspace a query walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// Rows, in primary key order.
    PrimaryKey,
    /// Entries of the named secondary key, in index order.
    SecondaryKey(String),
}

/// Constraints on the leading fields of a primary or secondary key.
///
/// Constraints are listed in key order: the i-th constraint must name the
/// i-th key field. Fields after the last constraint are unconstrained.
///
/// ```
/// use reldb_core::constraint::{any, exact, ConstraintQuery};
///
/// let query = ConstraintQuery::primary_key()
///     .field("tenant", exact(1u64))
///     .field("id", any());
/// assert_eq!(query.len(), 2);
/// ```
#[derive(Debug)]
pub struct ConstraintQuery {
    target: QueryTarget,
    fields: Vec<(String, Box<dyn Constraint>)>,
}

impl ConstraintQuery {
    /// Query over the primary key.
    #[must_use]
    pub fn primary_key() -> Self {
        Self {
            target: QueryTarget::PrimaryKey,
            fields: Vec::new(),
        }
    }

    /// Query over a secondary key.
    #[must_use]
    pub fn secondary_key(name: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::SecondaryKey(name.into()),
            fields: Vec::new(),
        }
    }

    /// Adds the constraint of the next key field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, constraint: impl Constraint + 'static) -> Self {
        self.fields.push((name.into(), Box::new(constraint)));
        self
    }

    /// The keyspace walked.
    #[must_use]
    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    /// Number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no field is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Prepares every constraint against the current version of `relation`.
    pub(crate) fn bind(self, relation: &RelationInfo) -> CoreResult<BoundQuery> {
        let (base, secondary, fields) = match &self.target {
            QueryTarget::PrimaryKey => (
                relation.row_prefix().to_vec(),
                None,
                relation.current().primary_fields().to_vec(),
            ),
            QueryTarget::SecondaryKey(name) => {
                let sk = relation.require_secondary_key(name)?.clone();
                let fields = relation.secondary_key_fields(&sk);
                (relation.secondary_key_prefix(&sk), Some(sk), fields)
            }
        };
        if self.fields.len() > fields.len() {
            return Err(CoreError::field_mismatch(format!(
                "{} constraints given, key of {} has {} fields",
                self.fields.len(),
                relation.name(),
                fields.len()
            )));
        }

        let mut constraints = Vec::with_capacity(self.fields.len());
        let mut match_types = Vec::with_capacity(self.fields.len());
        let mut codecs = Vec::with_capacity(self.fields.len());
        for (i, (name, mut constraint)) in self.fields.into_iter().enumerate() {
            let field = &fields[i];
            if field.name != name {
                return Err(CoreError::field_mismatch(format!(
                    "constraint {i} names {name}, key field {i} of {} is {}",
                    relation.name(),
                    field.name
                )));
            }
            match_types.push(constraint.prepare(field)?);
            codecs.push(field.codec.clone());
            constraints.push(constraint);
        }
        Ok(BoundQuery {
            base,
            secondary,
            constraints,
            match_types,
            codecs,
            key_fields: fields.len(),
        })
    }
}

/// A query with prepared constraints.
#[derive(Debug)]
pub(crate) struct BoundQuery {
    /// Keyspace prefix: row prefix or secondary key prefix.
    pub(crate) base: Vec<u8>,
    /// The secondary key walked, `None` for rows.
    pub(crate) secondary: Option<SecondaryKeyInfo>,
    pub(crate) constraints: Vec<Box<dyn Constraint>>,
    pub(crate) match_types: Vec<MatchType>,
    /// Codecs of the constrained fields.
    pub(crate) codecs: Vec<FieldCodec>,
    /// Number of fields in the walked key.
    pub(crate) key_fields: usize,
}

impl BoundQuery {
    /// Appends the seek bytes of the constraints starting at `from`: every
    /// consecutive exact constraint and at most one prefix constraint.
    pub(crate) fn write_bounds(&self, from: usize, out: &mut Vec<u8>) {
        for (constraint, match_type) in self.constraints[from..]
            .iter()
            .zip(&self.match_types[from..])
        {
            match match_type {
                MatchType::Exact => constraint.write_prefix(out),
                MatchType::Prefix => {
                    constraint.write_prefix(out);
                    break;
                }
                MatchType::NoPrefix | MatchType::Any => break,
            }
        }
    }

    /// Bytes every matching key starts with.
    pub(crate) fn fixed_prefix(&self) -> Vec<u8> {
        let mut prefix = self.base.clone();
        self.write_bounds(0, &mut prefix);
        prefix
    }

    /// Returns `true` if constraint `i` covers the last key field.
    pub(crate) fn is_last(&self, i: usize) -> bool {
        i + 1 == self.key_fields
    }

    pub(crate) fn len(&self) -> usize {
        self.constraints.len()
    }
}
