//! Error types for reldb core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in relational operations.
///
/// Schema integrity errors are raised while opening a relation or binding
/// a query. Write consistency errors mean the secondary indexes no longer
/// agree with the rows. Not-found errors are only raised by the strict
/// lookups; every lookup has an `_or_default` companion.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key-value store error.
    #[error("kv error: {0}")]
    Kv(#[from] reldb_kv::KvError),

    /// Field codec error.
    #[error("codec error: {0}")]
    Codec(#[from] reldb_codec::CodecError),

    /// The primary key of a relation changed between schema versions.
    #[error("primary key of relation {relation} changed: {message}")]
    PrimaryKeyChanged {
        /// Relation name.
        relation: String,
        /// Description of the change.
        message: String,
    },

    /// A relation name was registered twice with different layouts.
    #[error("relation {relation} is already registered with a different layout")]
    DuplicateRelation {
        /// Relation name.
        relation: String,
    },

    /// A stored row references a schema version that is not persisted.
    #[error("relation {relation} has no descriptor for version {version}")]
    MissingVersion {
        /// Relation name.
        relation: String,
        /// The missing version.
        version: u64,
    },

    /// A query names a field that does not exist or has another codec.
    #[error("field mismatch: {message}")]
    FieldMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A field uses the name reserved for the primary key self-reference.
    #[error("field name {name} is reserved")]
    ReservedFieldName {
        /// The offending name.
        name: String,
    },

    /// The relation layout is not usable.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A secondary index entry expected by the write path is missing.
    #[error("index corruption in relation {relation}, secondary key {index}: {message}")]
    IndexCorruption {
        /// Relation name.
        relation: String,
        /// Secondary key name.
        index: String,
        /// Description of the inconsistency.
        message: String,
    },

    /// No row matches the lookup.
    #[error("row not found in relation {relation}")]
    RowNotFound {
        /// Relation name.
        relation: String,
    },

    /// More than one row matches a lookup that expects a single row.
    #[error("more than one row of relation {relation} matches secondary key {index}")]
    AmbiguousMatch {
        /// Relation name.
        relation: String,
        /// Secondary key name.
        index: String,
    },

    /// A row with the same primary key already exists.
    #[error("duplicate primary key in relation {relation}")]
    DuplicateKey {
        /// Relation name.
        relation: String,
    },

    /// The transaction an enumerator or manipulator works on is gone.
    #[error("transaction is closed")]
    TransactionClosed,

    /// A row was read from an enumerator that is not on a row.
    #[error("enumerator is not positioned on a row")]
    CursorNotPositioned,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a primary key changed error.
    pub fn primary_key_changed(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PrimaryKeyChanged {
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// Creates a field mismatch error.
    pub fn field_mismatch(message: impl Into<String>) -> Self {
        Self::FieldMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an index corruption error.
    pub fn index_corruption(
        relation: impl Into<String>,
        index: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::IndexCorruption {
            relation: relation.into(),
            index: index.into(),
            message: message.into(),
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(relation: impl Into<String>) -> Self {
        Self::RowNotFound {
            relation: relation.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` for the not-found family that `_or_default` lookups absorb.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RowNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_relation() {
        let err = CoreError::index_corruption("users", "by_name", "entry missing");
        assert_eq!(
            err.to_string(),
            "index corruption in relation users, secondary key by_name: entry missing"
        );
    }

    #[test]
    fn lower_level_errors_convert() {
        let err: CoreError = reldb_kv::KvError::TransactionDisposed.into();
        assert!(matches!(err, CoreError::Kv(_)));
        let err: CoreError = reldb_codec::CodecError::UnexpectedEof.into();
        assert!(matches!(err, CoreError::Codec(_)));
        assert!(CoreError::row_not_found("users").is_not_found());
    }
}
