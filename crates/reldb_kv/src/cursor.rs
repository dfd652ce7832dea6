//! Ordered key-value capability traits.

use crate::error::KvResult;

/// Outcome of [`KvCursor::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// The exact key exists; the cursor is positioned on it.
    Exact,
    /// The key does not exist; the cursor is on the nearest greater key.
    Next,
    /// The key does not exist and no greater key shares the prefix; the
    /// cursor is on the nearest smaller key.
    Previous,
    /// No key shares the prefix; the cursor is not positioned.
    NotFound,
}

/// A transaction over an ordered key-value store.
///
/// The relational layer never owns a transaction manager. It receives a
/// transaction handle, opens as many cursors as it needs and checks
/// [`is_disposed`](KvTransaction::is_disposed) before advancing long-lived
/// enumerators.
///
/// # Invariants
///
/// - Keys are compared bytewise (lexicographically)
/// - Cursors created from the same transaction observe each other's writes
/// - Implementors must be `Send + Sync`
pub trait KvTransaction: Send + Sync {
    /// Opens a new, unpositioned cursor.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TransactionDisposed`](crate::KvError) when the
    /// transaction is no longer usable.
    fn create_cursor(&self) -> KvResult<Box<dyn KvCursor>>;

    /// Returns `true` once the transaction was committed or dropped.
    fn is_disposed(&self) -> bool;

    /// Marks the transaction as unusable without committing it.
    fn dispose(&self);

    /// Reads the value stored under `key`.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let mut cursor = self.create_cursor()?;
        match cursor.find(key, key.len())? {
            FindResult::Exact => Ok(Some(cursor.value()?)),
            _ => Ok(None),
        }
    }

    /// Stores `value` under `key`, returning `true` if the key was created.
    fn create_or_update(&self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        let mut cursor = self.create_cursor()?;
        cursor.create_or_update(key, value)
    }

    /// Erases every key starting with `prefix`.
    fn erase_range(&self, prefix: &[u8]) -> KvResult<u64> {
        let mut cursor = self.create_cursor()?;
        cursor.erase_range(prefix)
    }

    /// Counts the keys starting with `prefix`.
    fn count_with_prefix(&self, prefix: &[u8]) -> KvResult<u64> {
        let cursor = self.create_cursor()?;
        cursor.count_with_prefix(prefix)
    }
}

/// A cursor over the keys of one transaction.
///
/// Every `find_*` method returns `false` and leaves the cursor unpositioned
/// when no suitable key exists.
pub trait KvCursor: Send {
    /// Positions on the smallest key starting with `prefix`.
    fn find_first_key(&mut self, prefix: &[u8]) -> KvResult<bool>;

    /// Positions on the greatest key starting with `prefix`.
    fn find_last_key(&mut self, prefix: &[u8]) -> KvResult<bool>;

    /// Moves to the next key starting with `prefix`.
    ///
    /// An unpositioned cursor behaves like [`find_first_key`](Self::find_first_key).
    /// A cursor whose key was erased continues from the erased key.
    fn find_next_key(&mut self, prefix: &[u8]) -> KvResult<bool>;

    /// Moves to the previous key starting with `prefix`.
    ///
    /// An unpositioned cursor behaves like [`find_last_key`](Self::find_last_key).
    fn find_previous_key(&mut self, prefix: &[u8]) -> KvResult<bool>;

    /// Finds `key` or its nearest neighbour among keys sharing
    /// `key[..prefix_len]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix_len > key.len()`.
    fn find(&mut self, key: &[u8], prefix_len: usize) -> KvResult<FindResult>;

    /// Returns the key under the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::NotPositioned`](crate::KvError) for an unpositioned cursor.
    fn key(&self) -> KvResult<&[u8]>;

    /// Returns a copy of the value under the cursor.
    fn value(&self) -> KvResult<Vec<u8>>;

    /// Returns the ordinal of the current key among all keys in the store.
    fn key_index(&self) -> KvResult<u64>;

    /// Positions on the key with the given absolute ordinal.
    ///
    /// Returns `false` and leaves the cursor unpositioned when the ordinal is
    /// out of range or the key there does not start with `prefix`.
    fn seek_index(&mut self, prefix: &[u8], index: u64) -> KvResult<bool>;

    /// Inserts or replaces a key, leaving the cursor on it.
    ///
    /// Returns `true` if the key did not exist before.
    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool>;

    /// Erases the key under the cursor.
    ///
    /// The cursor remembers the erased key so that `find_next_key` and
    /// `find_previous_key` continue from it.
    fn erase_current(&mut self) -> KvResult<()>;

    /// Erases every key starting with `prefix` and returns how many were removed.
    fn erase_range(&mut self, prefix: &[u8]) -> KvResult<u64>;

    /// Counts the keys starting with `prefix`.
    fn count_with_prefix(&self, prefix: &[u8]) -> KvResult<u64>;

    /// Visits keys starting with `prefix` in ascending order from the first
    /// key greater than or equal to `from` until `visit` returns `false`.
    ///
    /// `from` is expected to start with `prefix`; any other value starts the
    /// scan at the first key of the prefix. This is the raw iteration used by
    /// bulk gathering and the cursor position afterwards is unspecified.
    fn scan_keys(
        &mut self,
        prefix: &[u8],
        from: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> bool,
    ) -> KvResult<()> {
        let found = if from.starts_with(prefix) {
            match self.find(from, prefix.len())? {
                FindResult::Exact | FindResult::Next => true,
                FindResult::Previous | FindResult::NotFound => false,
            }
        } else {
            self.find_first_key(prefix)?
        };
        if !found {
            return Ok(());
        }
        loop {
            let key = self.key()?;
            if !key.starts_with(prefix) || !visit(key) {
                return Ok(());
            }
            if !self.find_next_key(prefix)? {
                return Ok(());
            }
        }
    }

    /// Forgets the current position.
    fn invalidate(&mut self);
}

/// Returns the smallest key greater than every key starting with `prefix`,
/// `None` if `prefix` is empty or all `0xFF`.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last < u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}
