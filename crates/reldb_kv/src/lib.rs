//! # reldb_kv
//!
//! Ordered key-value capability consumed by the reldb relational layer.
//!
//! The relational layer never stores bytes by itself. It is handed a
//! [`KvTransaction`] and works exclusively through [`KvCursor`]s:
//! seeking by prefix, stepping to neighbouring keys, exact-or-nearest
//! lookup, ordinal positioning and range erasure.
//!
//! ## Implementations
//!
//! - [`MemoryKv`] - a `BTreeMap` backed store for tests and benchmarks
//!
//! Any ordered store with bytewise key comparison can be plugged in by
//! implementing both traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod memory;

pub use cursor::{prefix_successor, FindResult, KvCursor, KvTransaction};
pub use error::{KvError, KvResult};
pub use memory::{MemoryCursor, MemoryKv, MemoryTransaction};
