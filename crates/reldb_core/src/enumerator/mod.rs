//! Enumerators over the rows of a relation.
//!
//! - [`RelationEnumerator`] walks every key under a prefix, in row order or
//!   secondary key order
//! - [`AdvancedEnumerator`] adds start/end bounds, descending order and
//!   ordinal positioning
//! - [`RelationConstraintEnumerator`] evaluates a [`ConstraintQuery`]
//!   against encoded keys, seeking past ranges that cannot match
//!
//! Every enumerator implements [`Iterator`] over `CoreResult<Row>` and
//! fails with [`CoreError::TransactionClosed`] once its transaction is
//! disposed.
//!
//! [`ConstraintQuery`]: crate::constraint::ConstraintQuery

mod advanced;
mod constraint_scan;
mod plain;
pub(crate) mod seek;

pub use advanced::{AdvancedEnumerator, EnumerationOrder, KeyProposition, KeyRange};
pub use constraint_scan::{RelationConstraintEnumerator, ScanDirection};
pub use plain::{RelationEnumerator, RelationPrimaryKeyEnumerator, RelationSecondaryKeyEnumerator};

use crate::error::{CoreError, CoreResult};
use crate::relation::RelationInfo;
use crate::schema::{Row, SecondaryKeyInfo};
use reldb_codec::Value;
use reldb_kv::KvTransaction;

/// Lifecycle of an enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumeratorState {
    /// Not positioned yet; the next advance seeks.
    Created,
    /// On a key; the next advance moves from it.
    Positioned,
    /// No more keys.
    Exhausted,
}

pub(crate) fn ensure_open(tx: &dyn KvTransaction) -> CoreResult<()> {
    if tx.is_disposed() {
        return Err(CoreError::TransactionClosed);
    }
    Ok(())
}

/// Loads the row an index entry points at.
pub(crate) fn row_from_entry(
    tx: &dyn KvTransaction,
    relation: &RelationInfo,
    sk: &SecondaryKeyInfo,
    entry: &[u8],
) -> CoreResult<Row> {
    let key = relation.primary_key_from_entry(sk, entry)?;
    let value = tx.get(&key)?.ok_or_else(|| {
        CoreError::index_corruption(
            relation.name(),
            sk.name.as_str(),
            "index entry points at a missing row",
        )
    })?;
    relation.materialize(&key, &value)
}

/// Loads the row under `key`, either a row key or an entry of `secondary`.
pub(crate) fn load_row(
    tx: &dyn KvTransaction,
    relation: &RelationInfo,
    secondary: Option<&SecondaryKeyInfo>,
    key: &[u8],
) -> CoreResult<Row> {
    match secondary {
        Some(sk) => row_from_entry(tx, relation, sk, key),
        None => {
            let value = tx
                .get(key)?
                .ok_or_else(|| CoreError::row_not_found(relation.name()))?;
            relation.materialize(key, &value)
        }
    }
}

/// Encodes leading key values of the rows (`secondary` is `None`) or of an
/// index, including the keyspace prefix.
pub(crate) fn encode_prefix(
    relation: &RelationInfo,
    secondary: Option<&SecondaryKeyInfo>,
    values: &[Value],
) -> CoreResult<Vec<u8>> {
    match secondary {
        Some(sk) => relation.encode_secondary_prefix(sk, values),
        None => relation.encode_key(values),
    }
}
