//! Relation layouts and their versions.
//!
//! - [`RelationDescriptor`] is the live layout declared by the application
//! - [`RelationVersionInfo`] is one persisted, immutable version of it
//! - [`Row`] and [`Record`] carry data in and out of a relation

mod descriptor;
mod field;
mod row;
mod version;

pub use descriptor::RelationDescriptor;
pub use field::{FieldId, TableFieldInfo, PRIMARY_KEY};
pub use row::{Record, Row};
pub use version::{RelationVersionInfo, SecondaryKeyInfo};
