//! Keyspace layout.
//!
//! | prefix                                      | content                          |
//! |---------------------------------------------|----------------------------------|
//! | `0x00 0x01 ++ string(name)`                 | relation name to relation id     |
//! | `0x00 0x02 ++ varint(rel) ++ varint(ver)`   | schema version descriptor        |
//! | `0x00 0x03`                                 | last allocated relation id       |
//! | `0x00 0x04`                                 | last allocated object id         |
//! | `0x01 ++ varint(oid)`                       | object content                   |
//! | `0x02 ++ varint(dict)`                      | owned dictionary content         |
//! | `0x03 ++ varint(rel) ++ pk`                 | row                              |
//! | `0x04 ++ varint(rel) ++ byte(sk) ++ sk`     | secondary index entry            |

use crate::types::{RelationId, SchemaVersion};
use reldb_codec::{write_str, write_vuint};

/// Metadata keyspace.
pub const METADATA_PREFIX: u8 = 0x00;
/// Object content keyspace.
pub const OBJECT_PREFIX: u8 = 0x01;
/// Owned dictionary keyspace.
pub const DICTIONARY_PREFIX: u8 = 0x02;
/// Row keyspace.
pub const PRIMARY_KEY_PREFIX: u8 = 0x03;
/// Secondary index keyspace.
pub const SECONDARY_KEY_PREFIX: u8 = 0x04;

const RELATION_NAMES: u8 = 0x01;
const RELATION_VERSIONS: u8 = 0x02;
const LAST_RELATION_ID: u8 = 0x03;
const LAST_OBJECT_ID: u8 = 0x04;

/// Key mapping a relation name to its id.
#[must_use]
pub fn relation_name_key(name: &str) -> Vec<u8> {
    let mut key = vec![METADATA_PREFIX, RELATION_NAMES];
    write_str(&mut key, name);
    key
}

/// Prefix of every version descriptor of a relation.
#[must_use]
pub fn relation_versions_prefix(relation: RelationId) -> Vec<u8> {
    let mut key = vec![METADATA_PREFIX, RELATION_VERSIONS];
    write_vuint(&mut key, relation.as_u64());
    key
}

/// Key of one version descriptor.
#[must_use]
pub fn relation_version_key(relation: RelationId, version: SchemaVersion) -> Vec<u8> {
    let mut key = relation_versions_prefix(relation);
    write_vuint(&mut key, version.as_u64());
    key
}

/// Key of the relation id counter.
#[must_use]
pub fn last_relation_id_key() -> Vec<u8> {
    vec![METADATA_PREFIX, LAST_RELATION_ID]
}

/// Key of the object id counter.
#[must_use]
pub fn last_object_id_key() -> Vec<u8> {
    vec![METADATA_PREFIX, LAST_OBJECT_ID]
}

/// Prefix of the content owned by an object.
#[must_use]
pub fn object_prefix(oid: u64) -> Vec<u8> {
    let mut key = vec![OBJECT_PREFIX];
    write_vuint(&mut key, oid);
    key
}

/// Prefix of the content owned by a dictionary.
#[must_use]
pub fn dictionary_prefix(dict: u64) -> Vec<u8> {
    let mut key = vec![DICTIONARY_PREFIX];
    write_vuint(&mut key, dict);
    key
}

/// Prefix of every row of a relation.
#[must_use]
pub fn row_prefix(relation: RelationId) -> Vec<u8> {
    let mut key = vec![PRIMARY_KEY_PREFIX];
    write_vuint(&mut key, relation.as_u64());
    key
}

/// Prefix of every entry of one secondary key.
#[must_use]
pub fn secondary_key_prefix(relation: RelationId, index: u8) -> Vec<u8> {
    let mut key = vec![SECONDARY_KEY_PREFIX];
    write_vuint(&mut key, relation.as_u64());
    key.push(index);
    key
}
