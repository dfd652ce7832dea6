//! Cursor repositioning primitives shared by the enumerators.
//!
//! Every helper keeps the cursor inside `fixed`, the prefix all candidate
//! keys share, and returns `false` once no candidate is left in the
//! requested direction.

use crate::error::CoreResult;
use reldb_kv::{prefix_successor, FindResult, KvCursor};

/// Length of the common prefix of two keys.
pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Positions on the first key `>= target`.
pub(crate) fn seek_at_or_after(
    cursor: &mut dyn KvCursor,
    target: &[u8],
    fixed: &[u8],
) -> CoreResult<bool> {
    if !target.starts_with(fixed) {
        return Ok(false);
    }
    Ok(matches!(
        cursor.find(target, fixed.len())?,
        FindResult::Exact | FindResult::Next
    ))
}

/// Positions on the first key not starting with `prefix` and after it.
pub(crate) fn seek_past_prefix(
    cursor: &mut dyn KvCursor,
    prefix: &[u8],
    fixed: &[u8],
) -> CoreResult<bool> {
    if prefix.len() <= fixed.len() {
        return Ok(false);
    }
    match prefix_successor(prefix) {
        Some(succ) => seek_at_or_after(cursor, &succ, fixed),
        None => Ok(false),
    }
}

/// Positions on the last key `< target`.
pub(crate) fn seek_before(
    cursor: &mut dyn KvCursor,
    target: &[u8],
    fixed: &[u8],
) -> CoreResult<bool> {
    if !target.starts_with(fixed) {
        return Ok(false);
    }
    match cursor.find(target, fixed.len())? {
        FindResult::Exact | FindResult::Next => Ok(cursor.find_previous_key(fixed)?),
        FindResult::Previous => Ok(true),
        FindResult::NotFound => Ok(false),
    }
}

/// Positions on the last key starting with `target`, or else on the last
/// key `< target`.
pub(crate) fn seek_at_or_before_prefix(
    cursor: &mut dyn KvCursor,
    target: &[u8],
    fixed: &[u8],
) -> CoreResult<bool> {
    if cursor.find_last_key(target)? {
        return Ok(true);
    }
    seek_before(cursor, target, fixed)
}
