//! # reldb_core
//!
//! Relational storage layer on top of an ordered key-value store.
//!
//! A relation is a named table whose rows are stored as key/value pairs:
//! the primary key fields form the key and the remaining fields form the
//! value. This crate provides:
//! - Versioned relation layouts with on-the-fly upgrade of old rows
//! - Secondary keys kept consistent with the rows on every write
//! - Prefix, range and constraint-driven scans in both directions
//! - Batched inserts validated before they touch the store
//!
//! ## Usage
//!
//! ```
//! use reldb_codec::FieldCodec;
//! use reldb_core::constraint::{any, up_to, ConstraintQuery};
//! use reldb_core::{Config, RelationDescriptor, RelationRegistry, Row, ScanDirection};
//! use reldb_kv::MemoryKv;
//!
//! let store = MemoryKv::new();
//! let tx = store.begin();
//! let registry = RelationRegistry::new(Config::default());
//! let events = registry
//!     .register(
//!         tx.as_ref(),
//!         RelationDescriptor::new("events")
//!             .primary_key("day", FieldCodec::Unsigned)
//!             .primary_key("seq", FieldCodec::Unsigned)
//!             .value("kind", FieldCodec::String),
//!     )
//!     .unwrap();
//!
//! let db = registry.manipulator(tx.clone(), &events);
//! for (day, seq) in [(1u64, 1u64), (1, 2), (2, 1), (3, 1)] {
//!     db.insert(&Row::new().with("day", day).with("seq", seq).with("kind", "click"))
//!         .unwrap();
//! }
//!
//! let query = ConstraintQuery::primary_key()
//!     .field("day", up_to(2u64, true))
//!     .field("seq", any());
//! let rows: Vec<Row> = db
//!     .scan(query, ScanDirection::Backward)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(rows.len(), 3);
//! tx.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod constraint;
mod enumerator;
mod error;
pub mod keys;
mod manipulator;
mod object;
mod relation;
mod schema;
mod types;

pub use config::Config;
pub use constraint::{Constraint, ConstraintQuery, MatchResult, MatchType, QueryTarget};
pub use enumerator::{
    AdvancedEnumerator, EnumerationOrder, KeyProposition, KeyRange, RelationConstraintEnumerator,
    RelationEnumerator, RelationPrimaryKeyEnumerator, RelationSecondaryKeyEnumerator,
    ScanDirection,
};
pub use error::{CoreError, CoreResult};
pub use manipulator::{InsertBatch, RelationDbManipulator};
pub use object::{KvObjectLayer, ObjectLayer};
pub use relation::{RelationInfo, RelationRegistry};
pub use schema::{
    FieldId, Record, RelationDescriptor, RelationVersionInfo, Row, SecondaryKeyInfo,
    TableFieldInfo, PRIMARY_KEY,
};
pub use types::{RelationId, SchemaVersion};
