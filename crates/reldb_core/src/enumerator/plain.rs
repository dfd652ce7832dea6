//! Prefix enumerators.

use super::{encode_prefix, ensure_open, row_from_entry, EnumeratorState, ScanDirection};
use crate::error::{CoreError, CoreResult};
use crate::relation::RelationInfo;
use crate::schema::{Row, SecondaryKeyInfo};
use reldb_codec::Value;
use reldb_kv::{KvCursor, KvTransaction};
use std::sync::Arc;

/// Enumerates every row under a key prefix.
///
/// Walks either the rows themselves, in primary key order, or the entries
/// of one secondary key, resolving every entry to its row.
pub struct RelationEnumerator {
    tx: Arc<dyn KvTransaction>,
    relation: Arc<RelationInfo>,
    secondary: Option<SecondaryKeyInfo>,
    prefix: Vec<u8>,
    direction: ScanDirection,
    cursor: Option<Box<dyn KvCursor>>,
    state: EnumeratorState,
}

/// Enumerator over rows in primary key order.
pub type RelationPrimaryKeyEnumerator = RelationEnumerator;

/// Enumerator over rows in secondary key order.
pub type RelationSecondaryKeyEnumerator = RelationEnumerator;

impl RelationEnumerator {
    /// Rows whose primary key starts with `key_prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if more values than key fields
    /// are given or a value does not fit its field.
    pub fn primary_key(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        key_prefix: &[Value],
    ) -> CoreResult<Self> {
        let prefix = encode_prefix(&relation, None, key_prefix)?;
        Ok(Self::with_prefix(tx, relation, None, prefix))
    }

    /// Rows whose entry in secondary key `index` starts with `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if the relation has no such
    /// secondary key or the values do not fit its fields.
    pub fn secondary_key(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        index: &str,
        values: &[Value],
    ) -> CoreResult<Self> {
        let sk = relation.require_secondary_key(index)?.clone();
        let prefix = encode_prefix(&relation, Some(&sk), values)?;
        Ok(Self::with_prefix(tx, relation, Some(sk), prefix))
    }

    fn with_prefix(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        secondary: Option<SecondaryKeyInfo>,
        prefix: Vec<u8>,
    ) -> Self {
        Self {
            tx,
            relation,
            secondary,
            prefix,
            direction: ScanDirection::Forward,
            cursor: None,
            state: EnumeratorState::Created,
        }
    }

    /// Enumerates in descending key order.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.direction = ScanDirection::Backward;
        self.reset();
        self
    }

    /// Number of keys currently under the prefix.
    ///
    /// Asks the store without moving the enumerator; [`Iterator::count`]
    /// would consume it instead.
    pub fn key_count(&self) -> CoreResult<u64> {
        ensure_open(self.tx.as_ref())?;
        Ok(self.tx.count_with_prefix(&self.prefix)?)
    }

    /// Returns to the initial state.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.state = EnumeratorState::Created;
    }

    /// Moves to the next key, returning `false` when exhausted.
    pub fn move_next(&mut self) -> CoreResult<bool> {
        ensure_open(self.tx.as_ref())?;
        let found = match self.state {
            EnumeratorState::Exhausted => return Ok(false),
            EnumeratorState::Created => {
                let mut cursor = self.tx.create_cursor()?;
                let found = match self.direction {
                    ScanDirection::Forward => cursor.find_first_key(&self.prefix)?,
                    ScanDirection::Backward => cursor.find_last_key(&self.prefix)?,
                };
                self.cursor = Some(cursor);
                found
            }
            EnumeratorState::Positioned => {
                let cursor = self.cursor.as_mut().ok_or(CoreError::CursorNotPositioned)?;
                match self.direction {
                    ScanDirection::Forward => cursor.find_next_key(&self.prefix)?,
                    ScanDirection::Backward => cursor.find_previous_key(&self.prefix)?,
                }
            }
        };
        self.state = if found {
            EnumeratorState::Positioned
        } else {
            EnumeratorState::Exhausted
        };
        Ok(found)
    }

    /// Materializes the row the enumerator is on.
    pub fn current(&self) -> CoreResult<Row> {
        if self.state != EnumeratorState::Positioned {
            return Err(CoreError::CursorNotPositioned);
        }
        let cursor = self.cursor.as_deref().ok_or(CoreError::CursorNotPositioned)?;
        let key = cursor.key()?;
        match &self.secondary {
            Some(sk) => row_from_entry(self.tx.as_ref(), &self.relation, sk, key),
            None => self.relation.materialize(key, &cursor.value()?),
        }
    }
}

impl Iterator for RelationEnumerator {
    type Item = CoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.move_next() {
            Ok(true) => Some(self.current()),
            Ok(false) => None,
            Err(err) => {
                self.state = EnumeratorState::Exhausted;
                Some(Err(err))
            }
        }
    }
}

impl std::fmt::Debug for RelationEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationEnumerator")
            .field("relation", &self.relation.name())
            .field("secondary", &self.secondary.as_ref().map(|sk| sk.name.as_str()))
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::manipulator::RelationDbManipulator;
    use crate::object::KvObjectLayer;
    use crate::relation::RelationRegistry;
    use crate::schema::RelationDescriptor;
    use reldb_codec::FieldCodec;
    use reldb_kv::MemoryKv;

    fn setup() -> (Arc<dyn KvTransaction>, Arc<RelationInfo>) {
        let tx: Arc<dyn KvTransaction> = MemoryKv::new().begin();
        let registry = RelationRegistry::new(Config::default());
        let relation = registry
            .register(
                tx.as_ref(),
                RelationDescriptor::new("users")
                    .primary_key("tenant", FieldCodec::Unsigned)
                    .primary_key("id", FieldCodec::Unsigned)
                    .value("name", FieldCodec::String)
                    .secondary_key("by_name", &["name"]),
            )
            .unwrap();
        let db = registry.manipulator(Arc::clone(&tx), &relation);
        for (tenant, id, name) in [(1u64, 1u64, "b"), (1, 2, "a"), (2, 1, "c")] {
            db.insert(
                &Row::new()
                    .with("tenant", tenant)
                    .with("id", id)
                    .with("name", name),
            )
            .unwrap();
        }
        (tx, relation)
    }

    fn names(rows: impl Iterator<Item = CoreResult<Row>>) -> Vec<String> {
        rows.map(|row| row.unwrap().get("name").and_then(Value::as_str).unwrap().to_string())
            .collect()
    }

    #[test]
    fn primary_prefix_in_both_directions() {
        let (tx, relation) = setup();
        let forward =
            RelationEnumerator::primary_key(Arc::clone(&tx), Arc::clone(&relation), &[1u64.into()])
                .unwrap();
        assert_eq!(forward.key_count().unwrap(), 2);
        assert_eq!(names(forward), vec!["b", "a"]);

        let backward = RelationEnumerator::primary_key(tx, relation, &[]).unwrap().reversed();
        assert_eq!(names(backward), vec!["c", "a", "b"]);
    }

    #[test]
    fn key_count_follows_writes() {
        let (tx, relation) = setup();
        let mut e =
            RelationEnumerator::primary_key(Arc::clone(&tx), Arc::clone(&relation), &[1u64.into()])
                .unwrap();
        assert!(e.move_next().unwrap());
        assert_eq!(e.key_count().unwrap(), 2);

        let db = RelationDbManipulator::new(
            tx,
            relation,
            Arc::new(KvObjectLayer::new()),
            Config::default(),
        );
        db.insert(&Row::new().with("tenant", 1u64).with("id", 3u64).with("name", "d"))
            .unwrap();
        assert_eq!(e.key_count().unwrap(), 3);
        assert_eq!(names(e), vec!["a", "d"]);
    }

    #[test]
    fn secondary_order_resolves_rows() {
        let (tx, relation) = setup();
        let by_name =
            RelationEnumerator::secondary_key(Arc::clone(&tx), Arc::clone(&relation), "by_name", &[])
                .unwrap();
        assert_eq!(names(by_name), vec!["a", "b", "c"]);

        let err = RelationEnumerator::secondary_key(tx, relation, "missing", &[]).unwrap_err();
        assert!(matches!(err, CoreError::FieldMismatch { .. }));
    }

    #[test]
    fn reading_before_advance_is_misuse() {
        let (tx, relation) = setup();
        let mut e = RelationEnumerator::primary_key(tx, relation, &[]).unwrap();
        assert!(matches!(e.current(), Err(CoreError::CursorNotPositioned)));
        assert!(e.move_next().unwrap());
        assert!(e.current().is_ok());
    }
}
