//! Write path of a relation with transactional secondary key maintenance.
//!
//! Every write touches the store in the same order: the row itself, then
//! the secondary key entries that changed, then the content released by the
//! old row.
//!
//! # Invariants
//!
//! - After every operation the entries of each secondary key are exactly
//!   the entries derived from the stored rows
//! - An entry the write path expects but cannot find is index corruption
//! - Content is released only when no value of the new row references it

mod batch;

pub use batch::InsertBatch;

use crate::config::Config;
use crate::constraint::{ConstraintQuery, QueryTarget};
use crate::enumerator::{
    AdvancedEnumerator, KeyRange, RelationConstraintEnumerator, RelationEnumerator, ScanDirection,
};
use crate::error::{CoreError, CoreResult};
use crate::object::{allocate_dictionaries, ObjectLayer};
use crate::relation::RelationInfo;
use crate::schema::{Record, Row, SecondaryKeyInfo};
use reldb_codec::Value;
use reldb_kv::{FindResult, KvTransaction};
use std::sync::Arc;
use tracing::warn;

/// A row whose key is encoded and whose values are not.
#[derive(Debug)]
pub(crate) struct KeyedRow {
    pub(crate) key: Vec<u8>,
    pub(crate) identity: Vec<u8>,
    values: Vec<Value>,
}

/// A row encoded for the store.
#[derive(Debug)]
pub(crate) struct EncodedRow {
    pub(crate) key: Vec<u8>,
    /// Prefix of `key` covering the identity fields.
    pub(crate) identity: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

/// Erases one key, returning whether it existed.
fn erase_key(tx: &dyn KvTransaction, key: &[u8]) -> CoreResult<bool> {
    let mut cursor = tx.create_cursor()?;
    match cursor.find(key, key.len())? {
        FindResult::Exact => {
            cursor.erase_current()?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Reads and writes the rows of one relation inside one transaction.
///
/// ```
/// use reldb_codec::FieldCodec;
/// use reldb_core::{Config, RelationDescriptor, RelationRegistry, Row};
/// use reldb_kv::MemoryKv;
///
/// let store = MemoryKv::new();
/// let tx = store.begin();
/// let registry = RelationRegistry::new(Config::default());
/// let users = registry
///     .register(
///         tx.as_ref(),
///         RelationDescriptor::new("users")
///             .primary_key("id", FieldCodec::Unsigned)
///             .value("name", FieldCodec::String)
///             .secondary_key("by_name", &["name"]),
///     )
///     .unwrap();
/// let db = registry.manipulator(tx.clone(), &users);
///
/// db.insert(&Row::new().with("id", 1u64).with("name", "ada")).unwrap();
/// let found = db.find_by_secondary_key("by_name", &["ada".into()]).unwrap();
/// assert_eq!(found.get("id").and_then(|v| v.as_u64()), Some(1));
/// ```
pub struct RelationDbManipulator {
    tx: Arc<dyn KvTransaction>,
    relation: Arc<RelationInfo>,
    objects: Arc<dyn ObjectLayer>,
    config: Config,
}

impl RelationDbManipulator {
    /// Creates a manipulator.
    #[must_use]
    pub fn new(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        objects: Arc<dyn ObjectLayer>,
        config: Config,
    ) -> Self {
        Self {
            tx,
            relation,
            objects,
            config,
        }
    }

    /// The relation written to.
    #[must_use]
    pub fn relation(&self) -> &Arc<RelationInfo> {
        &self.relation
    }

    /// The transaction written to.
    #[must_use]
    pub fn transaction(&self) -> &Arc<dyn KvTransaction> {
        &self.tx
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.tx.is_disposed() {
            return Err(CoreError::TransactionClosed);
        }
        Ok(())
    }

    /// Splits a row and encodes its key without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the key is longer than the
    /// configured limit.
    pub(crate) fn key_row(&self, row: &Row) -> CoreResult<KeyedRow> {
        let (key_values, values) = self.relation.split_row(row)?;
        let key = self.relation.encode_key(&key_values)?;
        if key.len() > self.config.max_key_len {
            return Err(CoreError::invalid_operation(format!(
                "key of {} bytes exceeds the limit of {} bytes",
                key.len(),
                self.config.max_key_len
            )));
        }
        let identity = self
            .relation
            .encode_key(&key_values[..self.relation.identity_len()])?;
        Ok(KeyedRow {
            key,
            identity,
            values,
        })
    }

    /// Encodes the values of a keyed row, taking an id from `next_id` for
    /// every unallocated dictionary.
    pub(crate) fn encode_values(
        &self,
        row: KeyedRow,
        next_id: &mut dyn FnMut() -> CoreResult<u64>,
    ) -> CoreResult<EncodedRow> {
        let KeyedRow {
            key,
            identity,
            mut values,
        } = row;
        for (field, value) in self.relation.current().value_fields().iter().zip(&mut values) {
            allocate_dictionaries(&field.codec, value, next_id)?;
        }
        let value = self.relation.save_value(&values)?;
        Ok(EncodedRow {
            key,
            identity,
            value,
        })
    }

    /// Encodes the values of a keyed row. The id counter is persisted only
    /// once the row encoded successfully.
    fn encode_with_fresh_ids(&self, row: KeyedRow) -> CoreResult<EncodedRow> {
        let tx = self.tx.as_ref();
        let objects = self.objects.as_ref();
        let mut last = None;
        let encoded = self.encode_values(row, &mut || {
            let next = match last {
                Some(id) => id,
                None => objects.last_allocated_id(tx)?,
            } + 1;
            last = Some(next);
            Ok(next)
        })?;
        if let Some(id) = last {
            objects.set_last_allocated_id(tx, id)?;
        }
        Ok(encoded)
    }

    /// Finds the stored row with the given identity prefix.
    pub(crate) fn find_by_identity(&self, identity: &[u8]) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut cursor = self.tx.create_cursor()?;
        if !cursor.find_first_key(identity)? {
            return Ok(None);
        }
        Ok(Some((cursor.key()?.to_vec(), cursor.value()?)))
    }

    fn write_new(&self, row: &EncodedRow) -> CoreResult<()> {
        self.tx.create_or_update(&row.key, &row.value)?;
        for sk in self.relation.current().secondary_keys() {
            let entry = self.relation.secondary_key_entry(sk, &row.key, &row.value)?;
            self.tx.create_or_update(&entry, &[])?;
        }
        Ok(())
    }

    fn erase_entry(&self, sk: &SecondaryKeyInfo, entry: &[u8]) -> CoreResult<()> {
        if erase_key(self.tx.as_ref(), entry)? {
            return Ok(());
        }
        if self.config.strict_index_consistency {
            return Err(CoreError::index_corruption(
                self.relation.name(),
                sk.name.as_str(),
                "expected secondary key entry is missing",
            ));
        }
        warn!(
            relation = %self.relation.name(),
            secondary_key = %sk.name,
            "expected secondary key entry is missing"
        );
        Ok(())
    }

    /// Releases content owned by `old` and not referenced by `new`.
    fn release_content(&self, old: &[u8], new: Option<&[u8]>) -> CoreResult<()> {
        if !self.config.free_content || !self.relation.has_content() {
            return Ok(());
        }
        let kept = match new {
            Some(new) => self.relation.find_content(new)?,
            None => Vec::new(),
        };
        for content in self.relation.find_content(old)? {
            if !kept.contains(&content) {
                self.objects.free_content(self.tx.as_ref(), content)?;
            }
        }
        Ok(())
    }

    fn write_existing(
        &self,
        row: &EncodedRow,
        old_key: &[u8],
        old_value: &[u8],
        free: bool,
    ) -> CoreResult<()> {
        if old_key != row.key.as_slice() {
            erase_key(self.tx.as_ref(), old_key)?;
        }
        self.tx.create_or_update(&row.key, &row.value)?;
        for sk in self.relation.current().secondary_keys() {
            let old_entry = self.relation.secondary_key_entry(sk, old_key, old_value)?;
            let new_entry = self.relation.secondary_key_entry(sk, &row.key, &row.value)?;
            if old_entry != new_entry {
                self.erase_entry(sk, &old_entry)?;
                self.tx.create_or_update(&new_entry, &[])?;
            }
        }
        if free {
            self.release_content(old_value, Some(&row.value))?;
        }
        Ok(())
    }

    fn remove_row(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        erase_key(self.tx.as_ref(), key)?;
        for sk in self.relation.current().secondary_keys() {
            let entry = self.relation.secondary_key_entry(sk, key, value)?;
            self.erase_entry(sk, &entry)?;
        }
        self.release_content(value, None)
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a row with the same identity
    /// exists and [`CoreError::InvalidOperation`] if the key is too long.
    pub fn insert(&self, row: &Row) -> CoreResult<()> {
        self.ensure_open()?;
        let keyed = self.key_row(row)?;
        if self.find_by_identity(&keyed.identity)?.is_some() {
            return Err(CoreError::DuplicateKey {
                relation: self.relation.name().to_string(),
            });
        }
        let encoded = self.encode_with_fresh_ids(keyed)?;
        self.write_new(&encoded)
    }

    fn upsert_with(&self, row: &Row, free: bool) -> CoreResult<bool> {
        self.ensure_open()?;
        let keyed = self.key_row(row)?;
        let existing = self.find_by_identity(&keyed.identity)?;
        let encoded = self.encode_with_fresh_ids(keyed)?;
        match existing {
            Some((old_key, old_value)) => {
                self.write_existing(&encoded, &old_key, &old_value, free)?;
                Ok(false)
            }
            None => {
                self.write_new(&encoded)?;
                Ok(true)
            }
        }
    }

    /// Inserts the row or replaces the row with the same identity.
    ///
    /// Returns `true` if the row was inserted. Content owned by the
    /// replaced row and not referenced by the new one is released.
    pub fn upsert(&self, row: &Row) -> CoreResult<bool> {
        self.upsert_with(row, true)
    }

    /// Like [`upsert`](Self::upsert) without releasing content.
    pub fn shallow_upsert(&self, row: &Row) -> CoreResult<bool> {
        self.upsert_with(row, false)
    }

    fn update_with(&self, row: &Row, free: bool) -> CoreResult<()> {
        self.ensure_open()?;
        let keyed = self.key_row(row)?;
        let Some((old_key, old_value)) = self.find_by_identity(&keyed.identity)? else {
            return Err(CoreError::row_not_found(self.relation.name()));
        };
        let encoded = self.encode_with_fresh_ids(keyed)?;
        self.write_existing(&encoded, &old_key, &old_value, free)
    }

    /// Replaces the row with the same identity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowNotFound`] if there is no such row.
    pub fn update(&self, row: &Row) -> CoreResult<()> {
        self.update_with(row, true)
    }

    /// Like [`update`](Self::update) without releasing content.
    pub fn shallow_update(&self, row: &Row) -> CoreResult<()> {
        self.update_with(row, false)
    }

    fn identity_prefix(&self, id: &[Value]) -> CoreResult<Vec<u8>> {
        let identity_len = self.relation.identity_len();
        let key_len = self.relation.current().primary_fields().len();
        if id.len() != identity_len && id.len() != key_len {
            return Err(CoreError::field_mismatch(format!(
                "{} key values given, relation {} is identified by {identity_len}",
                id.len(),
                self.relation.name()
            )));
        }
        self.relation.encode_key(id)
    }

    /// Removes the row identified by `id`, returning whether it existed.
    pub fn remove_by_id(&self, id: &[Value]) -> CoreResult<bool> {
        self.ensure_open()?;
        let identity = self.identity_prefix(id)?;
        match self.find_by_identity(&identity)? {
            Some((key, value)) => {
                self.remove_row(&key, &value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every row whose primary key starts with `prefix` and returns
    /// how many were removed.
    pub fn remove_by_primary_key_prefix(&self, prefix: &[Value]) -> CoreResult<u64> {
        self.ensure_open()?;
        let encoded = self.relation.encode_key(prefix)?;
        if self.relation.current().secondary_keys().is_empty()
            && !(self.config.free_content && self.relation.has_content())
        {
            return Ok(self.tx.erase_range(&encoded)?);
        }

        let mut rows = Vec::new();
        let mut cursor = self.tx.create_cursor()?;
        let mut found = cursor.find_first_key(&encoded)?;
        while found {
            rows.push((cursor.key()?.to_vec(), cursor.value()?));
            found = cursor.find_next_key(&encoded)?;
        }
        for (key, value) in &rows {
            self.remove_row(key, value)?;
        }
        Ok(rows.len() as u64)
    }

    /// Returns `true` if a row is identified by `id`.
    pub fn contains(&self, id: &[Value]) -> CoreResult<bool> {
        self.ensure_open()?;
        let identity = self.identity_prefix(id)?;
        Ok(self.find_by_identity(&identity)?.is_some())
    }

    /// Returns the row identified by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowNotFound`] if there is no such row.
    pub fn find_by_id(&self, id: &[Value]) -> CoreResult<Row> {
        self.find_by_id_or_default(id)?
            .ok_or_else(|| CoreError::row_not_found(self.relation.name()))
    }

    /// Returns the row identified by `id`, if any.
    pub fn find_by_id_or_default(&self, id: &[Value]) -> CoreResult<Option<Row>> {
        self.ensure_open()?;
        let identity = self.identity_prefix(id)?;
        self.find_by_identity(&identity)?
            .map(|(key, value)| self.relation.materialize(&key, &value))
            .transpose()
    }

    /// Returns the single row whose secondary key starts with `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowNotFound`] if no row matches and
    /// [`CoreError::AmbiguousMatch`] if more than one does.
    pub fn find_by_secondary_key(&self, index: &str, values: &[Value]) -> CoreResult<Row> {
        self.find_by_secondary_key_or_default(index, values)?
            .ok_or_else(|| CoreError::row_not_found(self.relation.name()))
    }

    /// Returns the single row whose secondary key starts with `values`, if
    /// any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmbiguousMatch`] if more than one row matches.
    pub fn find_by_secondary_key_or_default(
        &self,
        index: &str,
        values: &[Value],
    ) -> CoreResult<Option<Row>> {
        let mut rows = self.list_by_secondary_key(index, values)?;
        let Some(first) = rows.next().transpose()? else {
            return Ok(None);
        };
        if rows.move_next()? {
            return Err(CoreError::AmbiguousMatch {
                relation: self.relation.name().to_string(),
                index: index.to_string(),
            });
        }
        Ok(Some(first))
    }

    /// Number of rows.
    pub fn count(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        Ok(self.tx.count_with_prefix(self.relation.row_prefix())?)
    }

    /// Number of rows whose primary key starts with `prefix`.
    pub fn count_by_primary_key_prefix(&self, prefix: &[Value]) -> CoreResult<u64> {
        self.ensure_open()?;
        let encoded = self.relation.encode_key(prefix)?;
        Ok(self.tx.count_with_prefix(&encoded)?)
    }

    /// Enumerates the rows whose primary key starts with `prefix`.
    pub fn list_by_primary_key_prefix(&self, prefix: &[Value]) -> CoreResult<RelationEnumerator> {
        self.ensure_open()?;
        RelationEnumerator::primary_key(Arc::clone(&self.tx), Arc::clone(&self.relation), prefix)
    }

    /// Enumerates the rows whose secondary key starts with `values`, in
    /// secondary key order.
    pub fn list_by_secondary_key(&self, index: &str, values: &[Value]) -> CoreResult<RelationEnumerator> {
        self.ensure_open()?;
        RelationEnumerator::secondary_key(
            Arc::clone(&self.tx),
            Arc::clone(&self.relation),
            index,
            values,
        )
    }

    /// Enumerates a bounded range of the rows or of a secondary key.
    pub fn range(&self, target: &QueryTarget, range: KeyRange) -> CoreResult<AdvancedEnumerator> {
        self.ensure_open()?;
        AdvancedEnumerator::new(Arc::clone(&self.tx), Arc::clone(&self.relation), target, range)
    }

    /// Scans with a constraint query.
    pub fn scan(
        &self,
        query: ConstraintQuery,
        direction: ScanDirection,
    ) -> CoreResult<RelationConstraintEnumerator> {
        self.ensure_open()?;
        RelationConstraintEnumerator::new(
            Arc::clone(&self.tx),
            Arc::clone(&self.relation),
            query,
            direction,
        )
    }

    /// Scans with a constraint query in descending key order.
    pub fn scan_reverse(&self, query: ConstraintQuery) -> CoreResult<RelationConstraintEnumerator> {
        self.scan(query, ScanDirection::Backward)
    }

    /// Collects a page of the rows matching a constraint query.
    ///
    /// See [`RelationConstraintEnumerator::fast_gather`].
    pub fn gather(&self, query: ConstraintQuery, skip: usize, take: usize) -> CoreResult<Vec<Row>> {
        self.scan(query, ScanDirection::Forward)?.fast_gather(skip, take)
    }

    /// Starts a batch of inserts applied together.
    #[must_use]
    pub fn insert_batch(&self) -> InsertBatch<'_> {
        InsertBatch::new(self)
    }

    /// Inserts or replaces a typed record. Returns `true` if inserted.
    pub fn upsert_record<T: Record>(&self, record: &T) -> CoreResult<bool> {
        self.upsert(&record.to_row())
    }

    /// Returns the typed record identified by `id`, if any.
    pub fn find_record<T: Record>(&self, id: &[Value]) -> CoreResult<Option<T>> {
        self.find_by_id_or_default(id)?
            .map(|row| T::from_row(&row))
            .transpose()
    }

    pub(crate) fn objects(&self) -> &Arc<dyn ObjectLayer> {
        &self.objects
    }
}

impl std::fmt::Debug for RelationDbManipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationDbManipulator")
            .field("relation", &self.relation.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
