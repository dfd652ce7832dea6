//! Identifier allocation and release of row-owned content.
//!
//! Rows can own content stored outside the relation keyspace: objects and
//! dictionaries, referenced from value fields by a 64-bit id. The
//! relational layer never interprets that content. It only needs fresh
//! ids and a way to drop everything stored under an id once no row
//! references it.

use crate::error::CoreResult;
use crate::keys::{dictionary_prefix, last_object_id_key, object_prefix};
use reldb_codec::{decode_vuint, encode_vuint, ContentRef, FieldCodec, Value};
use reldb_kv::KvTransaction;
use tracing::warn;

/// Object-graph capabilities used by the relational layer.
pub trait ObjectLayer: Send + Sync {
    /// Returns the last id handed out, `0` if none.
    fn last_allocated_id(&self, tx: &dyn KvTransaction) -> CoreResult<u64>;

    /// Persists the id counter.
    fn set_last_allocated_id(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<()>;

    /// Allocates a fresh id.
    fn allocate_id(&self, tx: &dyn KvTransaction) -> CoreResult<u64> {
        let id = self.last_allocated_id(tx)? + 1;
        self.set_last_allocated_id(tx, id)?;
        Ok(id)
    }

    /// Drops the content of an object and returns how many keys were removed.
    fn free_object(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<u64>;

    /// Drops the content of a dictionary and returns how many keys were removed.
    fn free_dictionary(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<u64>;

    /// Drops one piece of content.
    fn free_content(&self, tx: &dyn KvTransaction, content: ContentRef) -> CoreResult<u64> {
        match content {
            ContentRef::Object(id) => self.free_object(tx, id),
            ContentRef::Dictionary(id) => self.free_dictionary(tx, id),
        }
    }
}

/// [`ObjectLayer`] storing content directly in the key-value store.
///
/// The id counter lives in the metadata keyspace; content is freed by
/// erasing the key range owned by the id.
#[derive(Debug, Default, Clone, Copy)]
pub struct KvObjectLayer;

impl KvObjectLayer {
    /// Creates the object layer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ObjectLayer for KvObjectLayer {
    fn last_allocated_id(&self, tx: &dyn KvTransaction) -> CoreResult<u64> {
        match tx.get(&last_object_id_key())? {
            Some(bytes) => Ok(decode_vuint(&bytes)?.0),
            None => Ok(0),
        }
    }

    fn set_last_allocated_id(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<()> {
        tx.create_or_update(&last_object_id_key(), &encode_vuint(id))?;
        Ok(())
    }

    fn free_object(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<u64> {
        let removed = tx.erase_range(&object_prefix(id))?;
        if removed == 0 {
            warn!(object = id, "released object has no content");
        }
        Ok(removed)
    }

    fn free_dictionary(&self, tx: &dyn KvTransaction, id: u64) -> CoreResult<u64> {
        let removed = tx.erase_range(&dictionary_prefix(id))?;
        if removed == 0 {
            warn!(dictionary = id, "released dictionary has no content");
        }
        Ok(removed)
    }
}

/// Replaces every unallocated dictionary id (`0`) inside `value` with a
/// fresh id from `next_id`.
pub(crate) fn allocate_dictionaries(
    codec: &FieldCodec,
    value: &mut Value,
    next_id: &mut dyn FnMut() -> CoreResult<u64>,
) -> CoreResult<()> {
    match (codec, value) {
        (FieldCodec::Dictionary, Value::Dictionary(id)) if *id == 0 => {
            *id = next_id()?;
        }
        (FieldCodec::Optional(inner), value) if !value.is_null() => {
            allocate_dictionaries(inner, value, next_id)?;
        }
        (FieldCodec::List(inner), Value::List(items)) if inner.contains_content() => {
            for item in items {
                allocate_dictionaries(inner, item, next_id)?;
            }
        }
        _ => {}
    }
    Ok(())
}
