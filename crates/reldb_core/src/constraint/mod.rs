//! Per-field constraints evaluated directly on encoded keys.
//!
//! A constraint goes through three phases:
//!
//! 1. [`prepare`](Constraint::prepare) binds it to a field and reports how
//!    much of the field it pins down ([`MatchType`])
//! 2. [`write_prefix`](Constraint::write_prefix) emits the pinned bytes so
//!    the scanner can seek instead of walking
//! 3. [`match_field`](Constraint::match_field) tests one encoded field and
//!    advances the reader exactly past it
//!
//! Constraints never decode more than the field they are bound to, and most
//! of them compare bytes without decoding at all.

mod builtin;
mod query;

pub use builtin::{
    any, contains, ends_with, exact, predicate, starts_with, up_to, up_to_then_next, AnyConstraint,
    ContainsConstraint, EndsWithConstraint, ExactConstraint, PredicateConstraint,
    StartsWithConstraint, UpToConstraint,
};
pub use query::{ConstraintQuery, QueryTarget};
pub(crate) use query::BoundQuery;

use crate::error::CoreResult;
use crate::schema::TableFieldInfo;
use reldb_codec::{FieldCodec, KeyReader};

/// How much of its field a prepared constraint pins down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The whole encoded field is known.
    Exact,
    /// A leading part of the encoded field is known.
    Prefix,
    /// Nothing usable for seeking, but the field is still tested.
    NoPrefix,
    /// Every value matches.
    Any,
}

impl MatchType {
    /// Returns `true` if the constraint writes seek bytes.
    #[must_use]
    pub fn writes_prefix(self) -> bool {
        matches!(self, MatchType::Exact | MatchType::Prefix)
    }
}

/// Outcome of testing one encoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The field matches.
    Yes,
    /// The field matches and the next constraint holds for every key
    /// sharing this field value.
    YesSkipNext,
    /// The field does not match; later keys with the same leading fields
    /// might.
    No,
    /// The field does not match and no later key with the same preceding
    /// fields can.
    NoAfterLast,
}

impl MatchResult {
    /// Returns `true` for [`Yes`](Self::Yes) and [`YesSkipNext`](Self::YesSkipNext).
    #[must_use]
    pub fn is_match(self) -> bool {
        matches!(self, MatchResult::Yes | MatchResult::YesSkipNext)
    }
}

/// A predicate over one key field.
pub trait Constraint: Send {
    /// Binds the constraint to `field` and prepares its seek bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`](crate::CoreError::FieldMismatch)
    /// if the constraint cannot apply to the field's codec.
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType>;

    /// Appends the prepared seek bytes. Only called for
    /// [`MatchType::Exact`] and [`MatchType::Prefix`].
    fn write_prefix(&self, out: &mut Vec<u8>);

    /// Tests the field at the reader position and moves the reader past it.
    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult>;

    /// Like [`match_field`](Self::match_field) for a field that ends the key.
    fn match_last(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        self.match_field(reader)
    }

    /// Encoded upper bound of matching values and whether it is inclusive.
    ///
    /// Reverse scans use it to jump straight to the last candidate after a
    /// [`MatchResult::NoAfterLast`].
    fn upper_bound(&self) -> Option<(&[u8], bool)> {
        None
    }
}

impl std::fmt::Debug for dyn Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Constraint")
    }
}

/// Reads one encoded field and returns its bytes.
pub(crate) fn read_span<'a>(
    codec: &FieldCodec,
    reader: &mut KeyReader<'a>,
) -> CoreResult<&'a [u8]> {
    let begin = reader.position();
    codec.skip(reader)?;
    Ok(&reader.data()[begin..reader.position()])
}
