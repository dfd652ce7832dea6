//! Transaction wrapper recording the keys read through it.
//!
//! Used to check that scans seek past ranges instead of walking them.

use parking_lot::Mutex;
use reldb_kv::{FindResult, KvCursor, KvResult, KvTransaction};
use std::sync::Arc;

type Log = Arc<Mutex<Vec<Vec<u8>>>>;

/// A [`KvTransaction`] that records every key its cursors return.
pub struct RecordingTransaction {
    inner: Arc<dyn KvTransaction>,
    log: Log,
}

impl RecordingTransaction {
    /// Wraps a transaction.
    pub fn new(inner: Arc<dyn KvTransaction>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            log: Arc::default(),
        })
    }

    /// Keys read so far, in read order, with repeats.
    pub fn visited(&self) -> Vec<Vec<u8>> {
        self.log.lock().clone()
    }

    /// Returns `true` if any key starting with `prefix` was read.
    pub fn visited_prefix(&self, prefix: &[u8]) -> bool {
        self.log.lock().iter().any(|key| key.starts_with(prefix))
    }

    /// Forgets the recorded keys.
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl KvTransaction for RecordingTransaction {
    fn create_cursor(&self) -> KvResult<Box<dyn KvCursor>> {
        Ok(Box::new(RecordingCursor {
            inner: self.inner.create_cursor()?,
            log: Arc::clone(&self.log),
        }))
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn dispose(&self) {
        self.inner.dispose();
    }
}

struct RecordingCursor {
    inner: Box<dyn KvCursor>,
    log: Log,
}

impl KvCursor for RecordingCursor {
    fn find_first_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.find_first_key(prefix)
    }

    fn find_last_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.find_last_key(prefix)
    }

    fn find_next_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.find_next_key(prefix)
    }

    fn find_previous_key(&mut self, prefix: &[u8]) -> KvResult<bool> {
        self.inner.find_previous_key(prefix)
    }

    fn find(&mut self, key: &[u8], prefix_len: usize) -> KvResult<FindResult> {
        self.inner.find(key, prefix_len)
    }

    fn key(&self) -> KvResult<&[u8]> {
        let key = self.inner.key()?;
        self.log.lock().push(key.to_vec());
        Ok(key)
    }

    fn value(&self) -> KvResult<Vec<u8>> {
        self.inner.value()
    }

    fn key_index(&self) -> KvResult<u64> {
        self.inner.key_index()
    }

    fn seek_index(&mut self, prefix: &[u8], index: u64) -> KvResult<bool> {
        self.inner.seek_index(prefix, index)
    }

    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        self.inner.create_or_update(key, value)
    }

    fn erase_current(&mut self) -> KvResult<()> {
        self.inner.erase_current()
    }

    fn erase_range(&mut self, prefix: &[u8]) -> KvResult<u64> {
        self.inner.erase_range(prefix)
    }

    fn count_with_prefix(&self, prefix: &[u8]) -> KvResult<u64> {
        self.inner.count_with_prefix(prefix)
    }

    fn invalidate(&mut self) {
        self.inner.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_kv::MemoryKv;

    #[test]
    fn records_keys_read() {
        let tx = RecordingTransaction::new(MemoryKv::new().begin());
        tx.create_or_update(b"a1", b"").unwrap();
        tx.create_or_update(b"b1", b"").unwrap();
        tx.clear();

        let mut cursor = tx.create_cursor().unwrap();
        assert!(cursor.find_first_key(b"b").unwrap());
        assert_eq!(cursor.key().unwrap(), b"b1");
        assert!(tx.visited_prefix(b"b"));
        assert!(!tx.visited_prefix(b"a"));
        assert_eq!(tx.visited().len(), 1);
    }
}
