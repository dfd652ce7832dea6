//! In-memory ordered key-value store.

use crate::cursor::{prefix_successor, FindResult, KvCursor, KvTransaction};
use crate::error::{KvError, KvResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory ordered key-value store.
///
/// Suitable for:
/// - Unit and integration tests
/// - Benchmarks
/// - Embedders that need no durability
///
/// Each transaction works on a private copy of the tree and publishes it
/// on [`MemoryTransaction::commit`]. Concurrent committers overwrite each
/// other (last writer wins); the relational layer runs on one shared
/// transaction at a time.
///
/// # Example
///
/// ```rust
/// use reldb_kv::{KvTransaction, MemoryKv};
///
/// let store = MemoryKv::new();
/// let tx = store.begin();
/// tx.create_or_update(b"key", b"value").unwrap();
/// tx.commit().unwrap();
///
/// let tx = store.begin();
/// assert_eq!(tx.get(b"key").unwrap(), Some(b"value".to_vec()));
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    tree: Arc<RwLock<Tree>>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a transaction over a snapshot of the committed data.
    #[must_use]
    pub fn begin(&self) -> Arc<MemoryTransaction> {
        let snapshot = self.tree.read().clone();
        Arc::new(MemoryTransaction {
            store: Arc::clone(&self.tree),
            inner: Arc::new(TxInner {
                tree: RwLock::new(snapshot),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the number of committed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns `true` if nothing was committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Returns a copy of every committed key, in order.
    ///
    /// Useful for inspecting the persisted layout in tests.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.tree.read().keys().cloned().collect()
    }
}

#[derive(Debug)]
struct TxInner {
    tree: RwLock<Tree>,
    disposed: AtomicBool,
}

impl TxInner {
    fn check(&self) -> KvResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(KvError::TransactionDisposed)
        } else {
            Ok(())
        }
    }
}

/// A transaction over a [`MemoryKv`].
#[derive(Debug)]
pub struct MemoryTransaction {
    store: Arc<RwLock<Tree>>,
    inner: Arc<TxInner>,
}

impl MemoryTransaction {
    /// Publishes the transaction's writes and disposes it.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TransactionDisposed`] if the transaction was
    /// already committed or disposed.
    pub fn commit(&self) -> KvResult<()> {
        self.inner.check()?;
        let tree = self.inner.tree.read().clone();
        *self.store.write() = tree;
        self.inner.disposed.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns every key visible to this transaction.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.tree.read().keys().cloned().collect()
    }
}

impl KvTransaction for MemoryTransaction {
    fn create_cursor(&self) -> KvResult<Box<dyn KvCursor>> {
        self.inner.check()?;
        Ok(Box::new(MemoryCursor {
            inner: Arc::clone(&self.inner),
            current: None,
            positioned: false,
        }))
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
    }
}

/// Cursor over a [`MemoryTransaction`].
///
/// The cursor remembers the key it stands on and re-locates by key on every
/// move, so writes made through other cursors are observed.
#[derive(Debug)]
pub struct MemoryCursor {
    inner: Arc<TxInner>,
    /// Current key, or the anchor left behind by `erase_current`.
    current: Option<Vec<u8>>,
    positioned: bool,
}

impl MemoryCursor {
    fn place(&mut self, key: Option<&Vec<u8>>) -> bool {
        match key {
            Some(key) => {
                self.current = Some(key.clone());
                self.positioned = true;
                true
            }
            None => {
                self.current = None;
                self.positioned = false;
                false
            }
        }
    }

    fn first_in(tree: &Tree, prefix: &[u8]) -> Option<Vec<u8>> {
        tree.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
    }

    fn last_in(tree: &Tree, prefix: &[u8]) -> Option<Vec<u8>> {
        let found = match prefix_successor(prefix) {
            Some(succ) => tree
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(succ.as_slice())))
                .next_back(),
            None => tree.iter().next_back(),
        };
        found
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
    }
}

impl KvCursor for MemoryCursor {
    fn find_first_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.check()?;
        let found = Self::first_in(&self.inner.tree.read(), prefix);
        Ok(self.place(found.as_ref()))
    }

    fn find_last_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.check()?;
        let found = Self::last_in(&self.inner.tree.read(), prefix);
        Ok(self.place(found.as_ref()))
    }

    fn find_next_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.check()?;
        let Some(anchor) = self.current.as_deref() else {
            return self.find_first_key(prefix);
        };
        let found = {
            let tree = self.inner.tree.read();
            if anchor < prefix {
                Self::first_in(&tree, prefix)
            } else {
                tree.range::<[u8], _>((Bound::Excluded(anchor), Bound::Unbounded))
                    .next()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(k, _)| k.clone())
            }
        };
        Ok(self.place(found.as_ref()))
    }

    fn find_previous_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.check()?;
        let Some(anchor) = self.current.as_deref() else {
            return self.find_last_key(prefix);
        };
        let found = {
            let tree = self.inner.tree.read();
            if !anchor.starts_with(prefix) && anchor > prefix {
                Self::last_in(&tree, prefix)
            } else {
                tree.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(anchor)))
                    .next_back()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(k, _)| k.clone())
            }
        };
        Ok(self.place(found.as_ref()))
    }

    fn find(&mut self, key: &[u8], prefix_len: usize) -> KvResult<FindResult> {
        self.inner.check()?;
        if prefix_len > key.len() {
            return Err(KvError::InvalidPrefixLength {
                prefix_len,
                key_len: key.len(),
            });
        }
        let prefix = &key[..prefix_len];
        let (result, found) = {
            let tree = self.inner.tree.read();
            let next = tree
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(k, _)| k);
            match next {
                Some(k) if k.as_slice() == key => (FindResult::Exact, Some(k.clone())),
                Some(k) if k.starts_with(prefix) => (FindResult::Next, Some(k.clone())),
                _ => {
                    let previous = tree
                        .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
                        .next_back()
                        .map(|(k, _)| k)
                        .filter(|k| k.starts_with(prefix));
                    match previous {
                        Some(k) => (FindResult::Previous, Some(k.clone())),
                        None => (FindResult::NotFound, None),
                    }
                }
            }
        };
        self.place(found.as_ref());
        Ok(result)
    }

    fn key(&self) -> KvResult<&[u8]> {
        match (&self.current, self.positioned) {
            (Some(key), true) => Ok(key),
            _ => Err(KvError::NotPositioned),
        }
    }

    fn value(&self) -> KvResult<Vec<u8>> {
        self.inner.check()?;
        let key = self.key()?;
        self.inner
            .tree
            .read()
            .get(key)
            .cloned()
            .ok_or(KvError::NotPositioned)
    }

    fn key_index(&self) -> KvResult<u64> {
        self.inner.check()?;
        let key = self.key()?;
        let tree = self.inner.tree.read();
        Ok(tree
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .count() as u64)
    }

    fn seek_index(&mut self, prefix: &[u8], index: u64) -> KvResult<bool> {
        self.inner.check()?;
        let found = {
            let tree = self.inner.tree.read();
            usize::try_from(index)
                .ok()
                .and_then(|i| tree.keys().nth(i))
                .filter(|k| k.starts_with(prefix))
                .cloned()
        };
        Ok(self.place(found.as_ref()))
    }

    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        self.inner.check()?;
        let created = self
            .inner
            .tree
            .write()
            .insert(key.to_vec(), value.to_vec())
            .is_none();
        self.current = Some(key.to_vec());
        self.positioned = true;
        Ok(created)
    }

    fn erase_current(&mut self) -> KvResult<()> {
        self.inner.check()?;
        let key = self.key()?.to_vec();
        self.inner.tree.write().remove(&key);
        self.positioned = false;
        Ok(())
    }

    fn erase_range(&mut self, prefix: &[u8]) -> KvResult<u64> {
        self.inner.check()?;
        let mut tree = self.inner.tree.write();
        let doomed: Vec<Vec<u8>> = tree
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            tree.remove(key);
        }
        if self
            .current
            .as_deref()
            .is_some_and(|k| k.starts_with(prefix))
        {
            self.positioned = false;
        }
        Ok(doomed.len() as u64)
    }

    fn count_with_prefix(&self, prefix: &[u8]) -> KvResult<u64> {
        self.inner.check()?;
        let tree = self.inner.tree.read();
        Ok(tree
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .count() as u64)
    }

    fn scan_keys(
        &mut self,
        prefix: &[u8],
        from: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> bool,
    ) -> KvResult<()> {
        self.inner.check()?;
        let start = if from.starts_with(prefix) { from } else { prefix };
        let tree = self.inner.tree.read();
        for (key, _) in tree.range::<[u8], _>((Bound::Included(start), Bound::Unbounded)) {
            if !key.starts_with(prefix) || !visit(key) {
                break;
            }
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.current = None;
        self.positioned = false;
    }
}
