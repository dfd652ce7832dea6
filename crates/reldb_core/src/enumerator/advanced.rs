//! Bounded, ordered enumerators with ordinal positioning.

use super::seek::{seek_at_or_after, seek_at_or_before_prefix, seek_before, seek_past_prefix};
use super::{encode_prefix, ensure_open, row_from_entry, EnumeratorState};
use crate::constraint::QueryTarget;
use crate::error::{CoreError, CoreResult};
use crate::relation::RelationInfo;
use crate::schema::{Row, SecondaryKeyInfo};
use reldb_codec::Value;
use reldb_kv::{KvCursor, KvTransaction};
use std::sync::Arc;

/// How a range bound treats keys starting with the bound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyProposition {
    /// No bound.
    #[default]
    Ignored,
    /// Keys starting with the bound are in the range.
    Included,
    /// Keys starting with the bound are outside the range.
    Excluded,
}

/// Order of an [`AdvancedEnumerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumerationOrder {
    /// Ascending key order.
    #[default]
    Ascending,
    /// Descending key order.
    Descending,
}

/// Key range of an [`AdvancedEnumerator`].
///
/// Bound values continue the prefix: with prefix `[tenant]` and start
/// `[id]` the range starts at key `(tenant, id)`.
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    prefix: Vec<Value>,
    start: Vec<Value>,
    start_proposition: KeyProposition,
    end: Vec<Value>,
    end_proposition: KeyProposition,
    order: EnumerationOrder,
}

impl KeyRange {
    /// Every key under `prefix`, ascending.
    #[must_use]
    pub fn prefix(prefix: Vec<Value>) -> Self {
        Self {
            prefix,
            ..Self::default()
        }
    }

    /// Sets the start bound.
    #[must_use]
    pub fn start(mut self, values: Vec<Value>, proposition: KeyProposition) -> Self {
        self.start = values;
        self.start_proposition = proposition;
        self
    }

    /// Sets the end bound.
    #[must_use]
    pub fn end(mut self, values: Vec<Value>, proposition: KeyProposition) -> Self {
        self.end = values;
        self.end_proposition = proposition;
        self
    }

    /// Sets the order.
    #[must_use]
    pub const fn order(mut self, order: EnumerationOrder) -> Self {
        self.order = order;
        self
    }
}

/// Enumerates a bounded key range in either order.
///
/// Ordinals of the first and last key of the range are taken when the
/// enumerator is created, so [`key_count`](Self::key_count),
/// [`position`](Self::position) and [`set_position`](Self::set_position)
/// are plain arithmetic. They describe the keyspace at that moment and are
/// stale after writes to the range.
pub struct AdvancedEnumerator {
    tx: Arc<dyn KvTransaction>,
    relation: Arc<RelationInfo>,
    secondary: Option<SecondaryKeyInfo>,
    prefix: Vec<u8>,
    order: EnumerationOrder,
    first_index: u64,
    count: u64,
    position: u64,
    cursor: Option<Box<dyn KvCursor>>,
    state: EnumeratorState,
}

impl AdvancedEnumerator {
    /// Opens the range `range` of the rows or of a secondary key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if the target key does not
    /// exist or the bound values do not fit its fields.
    pub fn new(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        target: &QueryTarget,
        range: KeyRange,
    ) -> CoreResult<Self> {
        ensure_open(tx.as_ref())?;
        let secondary = match target {
            QueryTarget::PrimaryKey => None,
            QueryTarget::SecondaryKey(name) => Some(relation.require_secondary_key(name)?.clone()),
        };
        let prefix = encode_prefix(&relation, secondary.as_ref(), &range.prefix)?;
        let bound = |values: &[Value]| -> CoreResult<Vec<u8>> {
            let mut all = range.prefix.clone();
            all.extend_from_slice(values);
            encode_prefix(&relation, secondary.as_ref(), &all)
        };

        let mut cursor = tx.create_cursor()?;
        let first = match range.start_proposition {
            KeyProposition::Ignored => cursor.find_first_key(&prefix)?,
            KeyProposition::Included => seek_at_or_after(cursor.as_mut(), &bound(&range.start)?, &prefix)?,
            KeyProposition::Excluded => seek_past_prefix(cursor.as_mut(), &bound(&range.start)?, &prefix)?,
        };
        let first_index = if first { Some(cursor.key_index()?) } else { None };

        let last = match range.end_proposition {
            KeyProposition::Ignored => cursor.find_last_key(&prefix)?,
            KeyProposition::Included => {
                seek_at_or_before_prefix(cursor.as_mut(), &bound(&range.end)?, &prefix)?
            }
            KeyProposition::Excluded => seek_before(cursor.as_mut(), &bound(&range.end)?, &prefix)?,
        };
        let last_index = if last { Some(cursor.key_index()?) } else { None };

        let (first_index, count) = match (first_index, last_index) {
            (Some(first), Some(last)) if first <= last => (first, last - first + 1),
            _ => (0, 0),
        };
        Ok(Self {
            tx,
            relation,
            secondary,
            prefix,
            order: range.order,
            first_index,
            count,
            position: 0,
            cursor: None,
            state: EnumeratorState::Created,
        })
    }

    /// Number of keys in the range when the enumerator was created.
    ///
    /// Unlike [`Iterator::count`] this neither consumes the enumerator nor
    /// reads any row.
    #[must_use]
    pub fn key_count(&self) -> u64 {
        self.count
    }

    /// Position of the current key within the range, in enumeration order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CursorNotPositioned`] before the first advance
    /// and after exhaustion.
    pub fn position(&self) -> CoreResult<u64> {
        match self.state {
            EnumeratorState::Positioned => Ok(self.position),
            _ => Err(CoreError::CursorNotPositioned),
        }
    }

    fn absolute(&self, position: u64) -> u64 {
        match self.order {
            EnumerationOrder::Ascending => self.first_index + position,
            EnumerationOrder::Descending => self.first_index + (self.count - 1 - position),
        }
    }

    /// Moves to the key at `position` in enumeration order.
    ///
    /// Returns `false` and exhausts the enumerator when `position` is past
    /// the end of the range.
    pub fn set_position(&mut self, position: u64) -> CoreResult<bool> {
        ensure_open(self.tx.as_ref())?;
        if position >= self.count {
            self.state = EnumeratorState::Exhausted;
            return Ok(false);
        }
        let absolute = self.absolute(position);
        if self.cursor.is_none() {
            self.cursor = Some(self.tx.create_cursor()?);
        }
        let cursor = self.cursor.as_mut().ok_or(CoreError::CursorNotPositioned)?;
        if !cursor.seek_index(&self.prefix, absolute)? {
            self.state = EnumeratorState::Exhausted;
            return Ok(false);
        }
        self.position = position;
        self.state = EnumeratorState::Positioned;
        Ok(true)
    }

    /// Moves to the next key in enumeration order.
    pub fn move_next(&mut self) -> CoreResult<bool> {
        ensure_open(self.tx.as_ref())?;
        match self.state {
            EnumeratorState::Exhausted => Ok(false),
            EnumeratorState::Created => self.set_position(0),
            EnumeratorState::Positioned => {
                let next = self.position + 1;
                if next >= self.count {
                    self.state = EnumeratorState::Exhausted;
                    return Ok(false);
                }
                let cursor = self.cursor.as_mut().ok_or(CoreError::CursorNotPositioned)?;
                let found = match self.order {
                    EnumerationOrder::Ascending => cursor.find_next_key(&self.prefix)?,
                    EnumerationOrder::Descending => cursor.find_previous_key(&self.prefix)?,
                };
                if found {
                    self.position = next;
                    self.state = EnumeratorState::Positioned;
                } else {
                    self.state = EnumeratorState::Exhausted;
                }
                Ok(found)
            }
        }
    }

    /// Returns to the initial state.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.position = 0;
        self.state = EnumeratorState::Created;
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

impl Iterator for AdvancedEnumerator {
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

impl std::fmt::Debug for AdvancedEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvancedEnumerator")
            .field("relation", &self.relation.name())
            .field("order", &self.order)
            .field("count", &self.count)
            .field("state", &self.state)
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
                RelationDescriptor::new("events")
                    .primary_key("tenant", FieldCodec::Unsigned)
                    .primary_key("seq", FieldCodec::Unsigned)
                    .value("kind", FieldCodec::String)
                    .secondary_key("by_kind", &["kind"]),
            )
            .unwrap();
        let db = registry.manipulator(Arc::clone(&tx), &relation);
        for tenant in 1..=2u64 {
            for seq in 1..=5u64 {
                let kind = if seq % 2 == 0 { "even" } else { "odd" };
                db.insert(
                    &Row::new()
                        .with("tenant", tenant)
                        .with("seq", seq)
                        .with("kind", kind),
                )
                .unwrap();
            }
        }
        (tx, relation)
    }

    fn seqs(e: AdvancedEnumerator) -> Vec<u64> {
        e.map(|row| row.unwrap().get("seq").and_then(Value::as_u64).unwrap())
            .collect()
    }

    fn open(range: KeyRange) -> AdvancedEnumerator {
        let (tx, relation) = setup();
        AdvancedEnumerator::new(tx, relation, &QueryTarget::PrimaryKey, range).unwrap()
    }

    #[test]
    fn bounds_and_order() {
        let range = || {
            KeyRange::prefix(vec![1u64.into()])
                .start(vec![2u64.into()], KeyProposition::Included)
                .end(vec![4u64.into()], KeyProposition::Excluded)
        };
        let ascending = open(range());
        assert_eq!(ascending.key_count(), 2);
        assert_eq!(seqs(ascending), vec![2, 3]);

        let descending = open(range().order(EnumerationOrder::Descending));
        assert_eq!(seqs(descending), vec![3, 2]);

        let exclusive = open(
            KeyRange::prefix(vec![2u64.into()])
                .start(vec![2u64.into()], KeyProposition::Excluded)
                .end(vec![4u64.into()], KeyProposition::Included),
        );
        assert_eq!(seqs(exclusive), vec![3, 4]);
    }

    #[test]
    fn empty_range() {
        let e = open(
            KeyRange::prefix(vec![1u64.into()])
                .start(vec![4u64.into()], KeyProposition::Included)
                .end(vec![2u64.into()], KeyProposition::Included),
        );
        assert_eq!(e.key_count(), 0);
        assert!(seqs(e).is_empty());
        assert_eq!(open(KeyRange::prefix(vec![9u64.into()])).key_count(), 0);
    }

    #[test]
    fn positioning_by_ordinal() {
        let mut e = open(KeyRange::prefix(vec![2u64.into()]).order(EnumerationOrder::Descending));
        assert_eq!(e.key_count(), 5);
        assert!(e.position().is_err());
        assert!(e.set_position(1).unwrap());
        assert_eq!(e.position().unwrap(), 1);
        assert_eq!(e.current().unwrap().get("seq"), Some(&Value::Unsigned(4)));
        assert!(e.move_next().unwrap());
        assert_eq!(e.position().unwrap(), 2);
        assert_eq!(e.current().unwrap().get("seq"), Some(&Value::Unsigned(3)));
        assert!(!e.set_position(5).unwrap());
        e.reset();
        assert_eq!(seqs(e), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn secondary_range() {
        let (tx, relation) = setup();
        let e = AdvancedEnumerator::new(
            tx,
            relation,
            &QueryTarget::SecondaryKey("by_kind".into()),
            KeyRange::prefix(vec!["even".into()]),
        )
        .unwrap();
        assert_eq!(e.key_count(), 4);
        assert_eq!(seqs(e), vec![2, 4, 2, 4]);
    }

    #[test]
    fn key_count_is_taken_at_creation() {
        let (tx, relation) = setup();
        let mut e = AdvancedEnumerator::new(
            Arc::clone(&tx),
            Arc::clone(&relation),
            &QueryTarget::PrimaryKey,
            KeyRange::prefix(vec![1u64.into()]),
        )
        .unwrap();
        assert_eq!(e.key_count(), 5);
        assert!(e.move_next().unwrap());

        let db = RelationDbManipulator::new(
            Arc::clone(&tx),
            Arc::clone(&relation),
            Arc::new(KvObjectLayer::new()),
            Config::default(),
        );
        db.insert(&Row::new().with("tenant", 1u64).with("seq", 6u64).with("kind", "odd"))
            .unwrap();
        assert_eq!(e.key_count(), 5);
        assert_eq!(e.position().unwrap(), 0);

        let fresh =
            AdvancedEnumerator::new(tx, relation, &QueryTarget::PrimaryKey, KeyRange::prefix(vec![1u64.into()]))
                .unwrap();
        assert_eq!(fresh.key_count(), 6);
    }
}
