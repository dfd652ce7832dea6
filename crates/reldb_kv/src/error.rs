//! Error types for key-value operations.

use thiserror::Error;

/// Result type for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur while working with an ordered key-value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The transaction was committed, rolled back or otherwise disposed.
    #[error("transaction is disposed")]
    TransactionDisposed,

    /// The cursor is not positioned on an existing key.
    #[error("cursor is not positioned on a key")]
    NotPositioned,

    /// A prefix length larger than the searched key was supplied.
    #[error("prefix length {prefix_len} exceeds key length {key_len}")]
    InvalidPrefixLength {
        /// The requested prefix length.
        prefix_len: usize,
        /// The length of the searched key.
        key_len: usize,
    },

    /// The store contents are inconsistent.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}
