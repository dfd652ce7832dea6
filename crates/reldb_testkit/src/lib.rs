//! # reldb_testkit
//!
//! Test utilities for reldb.
//!
//! This crate provides:
//! - Fixtures that open relations over an in-memory store
//! - A transaction wrapper that records every key a scan reads
//! - Property-based generators for rows and write sequences
//! - Consistency checks between rows and their secondary keys
//!
//! ## Usage
//!
//! ```
//! use reldb_testkit::prelude::*;
//!
//! let fixture = TestRelation::open(users_descriptor());
//! let db = fixture.manipulator();
//! db.insert(&user_row(1, 1, "ada")).unwrap();
//! assert_index_consistent(&db);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recording::*;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`, once per process.
///
/// Defaults to `warn` so that tests only show consistency warnings.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
