//! Constraint-driven range scan.
//!
//! The scanner keeps the key it is on and, for every constraint, the end
//! offset of the field it tested. Moving to a neighbouring key only
//! invalidates the offsets past the common prefix of both keys, so
//! constraints on unchanged leading fields are not evaluated again. When a
//! constraint fails, the scanner seeks over the whole range that shares the
//! failing field instead of visiting it key by key:
//!
//! | direction | failure                          | seek                                              |
//! |-----------|----------------------------------|---------------------------------------------------|
//! | forward   | exact/prefix below its value     | to the key rebuilt from the seek bytes            |
//! | forward   | `NoAfterLast`                    | past every key sharing the fields before it       |
//! | forward   | `No`                             | past every key sharing the fields up to it        |
//! | backward  | exact/prefix above its value     | to the last key with the rebuilt seek bytes       |
//! | backward  | exact/prefix below its value     | before every key sharing the fields before it     |
//! | backward  | `NoAfterLast` with upper bound   | to the last key at or below the bound             |
//! | backward  | other                            | before every key sharing the fields up to it      |

use super::seek::{
    common_prefix_len, seek_at_or_after, seek_at_or_before_prefix, seek_before, seek_past_prefix,
};
use super::{ensure_open, load_row, row_from_entry, EnumeratorState};
use crate::constraint::{BoundQuery, ConstraintQuery, MatchResult};
use crate::error::{CoreError, CoreResult};
use crate::relation::RelationInfo;
use crate::schema::Row;
use reldb_codec::KeyReader;
use reldb_kv::{KvCursor, KvTransaction};
use std::sync::Arc;
use tracing::trace;

/// Direction of a constraint scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Backward,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    index: usize,
    start: usize,
    end: usize,
    result: MatchResult,
}

/// Evaluates constraints `first..` on `key`, starting at byte `start`.
///
/// Records the end offset of every field that matched and the presumptions
/// made by [`MatchResult::YesSkipNext`].
fn evaluate_from(
    query: &BoundQuery,
    key: &[u8],
    first: usize,
    start: usize,
    offsets: &mut [Option<usize>],
    presumed: &mut [bool],
) -> CoreResult<Option<Failure>> {
    let mut reader = KeyReader::at(key, start);
    for j in first..query.len() {
        let start = reader.position();
        let result = if presumed[j] {
            query.codecs[j].skip(&mut reader)?;
            MatchResult::Yes
        } else if query.is_last(j) {
            query.constraints[j].match_last(&mut reader)?
        } else {
            query.constraints[j].match_field(&mut reader)?
        };
        let end = reader.position();
        match result {
            MatchResult::Yes => {}
            MatchResult::YesSkipNext => {
                if let Some(next) = presumed.get_mut(j + 1) {
                    *next = true;
                }
            }
            MatchResult::No | MatchResult::NoAfterLast => {
                return Ok(Some(Failure {
                    index: j,
                    start,
                    end,
                    result,
                }));
            }
        }
        offsets[j] = Some(end);
    }
    Ok(None)
}

/// Scans a relation or one of its secondary keys with a [`ConstraintQuery`].
///
/// ```
/// use reldb_codec::FieldCodec;
/// use reldb_core::constraint::{any, exact, ConstraintQuery};
/// use reldb_core::{Config, RelationDescriptor, RelationRegistry, Row, ScanDirection};
/// use reldb_kv::MemoryKv;
///
/// let store = MemoryKv::new();
/// let tx = store.begin();
/// let registry = RelationRegistry::new(Config::default());
/// let users = registry
///     .register(
///         tx.as_ref(),
///         RelationDescriptor::new("users")
///             .primary_key("tenant", FieldCodec::Unsigned)
///             .primary_key("id", FieldCodec::Unsigned)
///             .value("name", FieldCodec::String),
///     )
///     .unwrap();
/// let db = registry.manipulator(tx.clone(), &users);
/// db.insert(&Row::new().with("tenant", 1u64).with("id", 1u64).with("name", "a")).unwrap();
/// db.insert(&Row::new().with("tenant", 2u64).with("id", 1u64).with("name", "c")).unwrap();
///
/// let query = ConstraintQuery::primary_key()
///     .field("tenant", exact(1u64))
///     .field("id", any());
/// let rows: Vec<Row> = db
///     .scan(query, ScanDirection::Forward)
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(rows.len(), 1);
/// ```
pub struct RelationConstraintEnumerator {
    tx: Arc<dyn KvTransaction>,
    relation: Arc<RelationInfo>,
    query: BoundQuery,
    direction: ScanDirection,
    fixed: Vec<u8>,
    cursor: Option<Box<dyn KvCursor>>,
    state: EnumeratorState,
    key: Vec<u8>,
    offsets: Vec<Option<usize>>,
    presumed: Vec<bool>,
    seek_buf: Vec<u8>,
}

impl RelationConstraintEnumerator {
    /// Binds `query` to the current version of `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if a constraint does not fit the
    /// key field it names.
    pub fn new(
        tx: Arc<dyn KvTransaction>,
        relation: Arc<RelationInfo>,
        query: ConstraintQuery,
        direction: ScanDirection,
    ) -> CoreResult<Self> {
        let query = query.bind(&relation)?;
        let fixed = query.fixed_prefix();
        let n = query.len();
        Ok(Self {
            tx,
            relation,
            query,
            direction,
            fixed,
            cursor: None,
            state: EnumeratorState::Created,
            key: Vec::new(),
            offsets: vec![None; n],
            presumed: vec![false; n],
            seek_buf: Vec::new(),
        })
    }

    /// The scan direction.
    #[must_use]
    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    /// Bytes every matching key starts with.
    #[must_use]
    pub fn fixed_prefix(&self) -> &[u8] {
        &self.fixed
    }

    /// Returns to the initial state; the next advance seeks again.
    pub fn reset(&mut self) {
        self.state = EnumeratorState::Created;
        self.cursor = None;
        self.key.clear();
        self.offsets.fill(None);
        self.presumed.fill(false);
    }

    /// Moves to the next matching key.
    ///
    /// Returns `false` once the scan is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] if the transaction was
    /// disposed. Any error ends the scan.
    pub fn move_next(&mut self) -> CoreResult<bool> {
        let result = self.advance();
        if result.is_err() {
            self.state = EnumeratorState::Exhausted;
        }
        result
    }

    fn advance(&mut self) -> CoreResult<bool> {
        ensure_open(self.tx.as_ref())?;
        let mut found = match self.state {
            EnumeratorState::Exhausted => return Ok(false),
            EnumeratorState::Created => {
                let mut cursor = self.tx.create_cursor()?;
                let found = match self.direction {
                    ScanDirection::Forward => cursor.find_first_key(&self.fixed)?,
                    ScanDirection::Backward => cursor.find_last_key(&self.fixed)?,
                };
                trace!(
                    relation = %self.relation.name(),
                    prefix_len = self.fixed.len(),
                    found,
                    "constraint scan initial seek"
                );
                self.cursor = Some(cursor);
                self.state = EnumeratorState::Positioned;
                found
            }
            EnumeratorState::Positioned => {
                let cursor = self.cursor.as_mut().ok_or(CoreError::CursorNotPositioned)?;
                match self.direction {
                    ScanDirection::Forward => cursor.find_next_key(&self.fixed)?,
                    ScanDirection::Backward => cursor.find_previous_key(&self.fixed)?,
                }
            }
        };

        loop {
            if !found {
                self.state = EnumeratorState::Exhausted;
                return Ok(false);
            }
            let cursor = self.cursor.as_deref().ok_or(CoreError::CursorNotPositioned)?;
            let next_key = cursor.key()?;
            let common = common_prefix_len(&self.key, next_key);
            self.key.clear();
            self.key.extend_from_slice(next_key);

            match self.revalidate(common)? {
                None => return Ok(true),
                Some(failure) => found = self.skip(failure)?,
            }
        }
    }

    /// Re-evaluates the constraints whose fields changed.
    fn revalidate(&mut self, common: usize) -> CoreResult<Option<Failure>> {
        let n = self.query.len();
        let Some(first) = (0..n).find(|&j| self.offsets[j].map_or(true, |end| end > common)) else {
            return Ok(None);
        };
        for j in first..n {
            self.offsets[j] = None;
            if j > first {
                self.presumed[j] = false;
            }
        }
        let start = match first {
            0 => self.query.base.len(),
            _ => self.offsets[first - 1].unwrap_or(self.query.base.len()),
        };
        evaluate_from(
            &self.query,
            &self.key,
            first,
            start,
            &mut self.offsets,
            &mut self.presumed,
        )
    }

    /// Seeks over the range that shares the failing field.
    fn skip(&mut self, failure: Failure) -> CoreResult<bool> {
        let Failure {
            index,
            start,
            end,
            result,
        } = failure;
        let cursor = self
            .cursor
            .as_deref_mut()
            .ok_or(CoreError::CursorNotPositioned)?;
        let key = &self.key;
        let fixed = &self.fixed;
        let buf = &mut self.seek_buf;
        buf.clear();
        let bounded = self.query.match_types[index].writes_prefix();

        let found = match (self.direction, bounded, result) {
            (ScanDirection::Forward, true, MatchResult::No) => {
                buf.extend_from_slice(&key[..start]);
                self.query.write_bounds(index, buf);
                seek_at_or_after(cursor, buf, fixed)?
            }
            (ScanDirection::Forward, _, MatchResult::NoAfterLast) => {
                seek_past_prefix(cursor, &key[..start], fixed)?
            }
            (ScanDirection::Forward, _, _) => seek_past_prefix(cursor, &key[..end], fixed)?,
            (ScanDirection::Backward, true, MatchResult::NoAfterLast) => {
                buf.extend_from_slice(&key[..start]);
                self.query.write_bounds(index, buf);
                seek_at_or_before_prefix(cursor, buf, fixed)?
            }
            (ScanDirection::Backward, true, _) => seek_before(cursor, &key[..start], fixed)?,
            (ScanDirection::Backward, false, MatchResult::NoAfterLast) => {
                match self.query.constraints[index].upper_bound() {
                    Some((bound, inclusive)) => {
                        buf.extend_from_slice(&key[..start]);
                        buf.extend_from_slice(bound);
                        if inclusive {
                            seek_at_or_before_prefix(cursor, buf, fixed)?
                        } else {
                            seek_before(cursor, buf, fixed)?
                        }
                    }
                    None => seek_before(cursor, &key[..end], fixed)?,
                }
            }
            (ScanDirection::Backward, false, _) => seek_before(cursor, &key[..end], fixed)?,
        };
        trace!(
            relation = %self.relation.name(),
            constraint = index,
            ?result,
            found,
            "constraint scan seek"
        );
        Ok(found)
    }

    /// Key the scan is on.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CursorNotPositioned`] unless the last
    /// [`move_next`](Self::move_next) returned `true`.
    pub fn current_key(&self) -> CoreResult<&[u8]> {
        match self.state {
            EnumeratorState::Positioned => Ok(&self.key),
            _ => Err(CoreError::CursorNotPositioned),
        }
    }

    /// Materializes the row the scan is on.
    pub fn current(&self) -> CoreResult<Row> {
        let key = self.current_key()?;
        match &self.query.secondary {
            Some(sk) => row_from_entry(self.tx.as_ref(), &self.relation, sk, key),
            None => {
                let cursor = self.cursor.as_deref().ok_or(CoreError::CursorNotPositioned)?;
                self.relation.materialize(key, &cursor.value()?)
            }
        }
    }

    /// Collects up to `take` matching rows after skipping `skip` of them.
    ///
    /// Seeks once to the fixed prefix and then tests every following key
    /// with all constraints, in ascending order, stopping at the first
    /// field that can no longer match. The scan state is not touched.
    pub fn fast_gather(&self, skip: usize, take: usize) -> CoreResult<Vec<Row>> {
        ensure_open(self.tx.as_ref())?;
        if take == 0 {
            return Ok(Vec::new());
        }
        let n = self.query.len();
        let mut offsets = vec![None; n];
        let mut presumed = vec![false; n];
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut skipped = 0usize;
        let mut error = None;

        let mut cursor = self.tx.create_cursor()?;
        cursor.scan_keys(&self.fixed, &self.fixed, &mut |key| {
            presumed.fill(false);
            match evaluate_from(
                &self.query,
                key,
                0,
                self.query.base.len(),
                &mut offsets,
                &mut presumed,
            ) {
                Ok(None) if skipped < skip => {
                    skipped += 1;
                    true
                }
                Ok(None) => {
                    keys.push(key.to_vec());
                    keys.len() < take
                }
                Ok(Some(failure)) => {
                    failure.result != MatchResult::NoAfterLast || failure.start > self.fixed.len()
                }
                Err(err) => {
                    error = Some(err);
                    false
                }
            }
        })?;
        if let Some(err) = error {
            return Err(err);
        }
        trace!(
            relation = %self.relation.name(),
            skipped,
            gathered = keys.len(),
            "fast gather"
        );
        keys.iter()
            .map(|key| {
                load_row(
                    self.tx.as_ref(),
                    &self.relation,
                    self.query.secondary.as_ref(),
                    key,
                )
            })
            .collect()
    }
}

impl Iterator for RelationConstraintEnumerator {
    type Item = CoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.move_next() {
            Ok(true) => Some(self.current()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl std::fmt::Debug for RelationConstraintEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationConstraintEnumerator")
            .field("relation", &self.relation.name())
            .field("direction", &self.direction)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
