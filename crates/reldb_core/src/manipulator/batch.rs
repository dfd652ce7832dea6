//! Batched inserts serialized up front and written in one pass.

use super::RelationDbManipulator;
use crate::error::{CoreError, CoreResult};
use crate::schema::Row;
use reldb_kv::KvTransaction;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

type Callback = Box<dyn FnOnce(&dyn KvTransaction) -> CoreResult<()> + Send>;

/// One deferred write.
enum Command {
    /// Writes a row.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Writes a secondary key entry.
    PutIndex { key: Vec<u8> },
    /// Runs caller code at its position in the batch.
    Callback(Callback),
}

/// Inserts serialized ahead of time and applied together.
///
/// Rows are encoded and checked against each other as they are added; the
/// store is not touched until [`apply`](Self::apply). Dictionary ids are
/// handed out from a local counter, which `apply` persists and refuses to
/// overwrite if other writers advanced it in the meantime.
pub struct InsertBatch<'a> {
    manipulator: &'a RelationDbManipulator,
    commands: Vec<Command>,
    identities: Vec<Vec<u8>>,
    seen: HashSet<Vec<u8>>,
    ids: Option<(u64, u64)>,
    rows: usize,
}

impl<'a> InsertBatch<'a> {
    pub(super) fn new(manipulator: &'a RelationDbManipulator) -> Self {
        Self {
            manipulator,
            commands: Vec::new(),
            identities: Vec::new(),
            seen: HashSet::new(),
            ids: None,
            rows: 0,
        }
    }

    /// Encodes a row and queues its writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the batch already holds a row
    /// with the same identity.
    pub fn serialize_insert(&mut self, row: &Row) -> CoreResult<()> {
        let manipulator = self.manipulator;
        let keyed = manipulator.key_row(row)?;
        if self.seen.contains(&keyed.identity) {
            return Err(CoreError::DuplicateKey {
                relation: manipulator.relation().name().to_string(),
            });
        }
        let mut ids = self.ids;
        let encoded = manipulator.encode_values(keyed, &mut || {
            let (base, last) = match ids {
                Some(ids) => ids,
                None => {
                    let tx = manipulator.transaction();
                    let base = manipulator.objects().last_allocated_id(tx.as_ref())?;
                    (base, base)
                }
            };
            ids = Some((base, last + 1));
            Ok(last + 1)
        })?;
        self.seen.insert(encoded.identity.clone());
        self.ids = ids;

        let relation = manipulator.relation();
        let mut entries = Vec::with_capacity(relation.current().secondary_keys().len());
        for sk in relation.current().secondary_keys() {
            entries.push(relation.secondary_key_entry(sk, &encoded.key, &encoded.value)?);
        }
        self.commands.push(Command::Put {
            key: encoded.key,
            value: encoded.value,
        });
        self.commands
            .extend(entries.into_iter().map(|key| Command::PutIndex { key }));
        self.identities.push(encoded.identity);
        self.rows += 1;
        Ok(())
    }

    /// Queues caller code to run after the writes queued so far.
    pub fn on_apply<F>(&mut self, callback: F)
    where
        F: FnOnce(&dyn KvTransaction) -> CoreResult<()> + Send + 'static,
    {
        self.commands.push(Command::Callback(Box::new(callback)));
    }

    /// Number of queued rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Returns `true` if no row is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Writes every queued row and returns how many were written.
    ///
    /// Nothing is written if any row already exists in the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a queued row already exists and
    /// [`CoreError::InvalidOperation`] if the object id counter moved since
    /// the batch allocated ids from it.
    pub fn apply(self) -> CoreResult<usize> {
        let manipulator = self.manipulator;
        manipulator.ensure_open()?;
        for identity in &self.identities {
            if manipulator.find_by_identity(identity)?.is_some() {
                return Err(CoreError::DuplicateKey {
                    relation: manipulator.relation().name().to_string(),
                });
            }
        }

        let tx = manipulator.transaction().as_ref();
        let objects = manipulator.objects();
        if let Some((base, last)) = self.ids {
            let current = objects.last_allocated_id(tx)?;
            if current != base {
                return Err(CoreError::invalid_operation(format!(
                    "object id counter moved from {base} to {current} during the batch"
                )));
            }
            objects.set_last_allocated_id(tx, last)?;
        }

        for command in self.commands {
            match command {
                Command::Put { key, value } => {
                    tx.create_or_update(&key, &value)?;
                }
                Command::PutIndex { key } => {
                    tx.create_or_update(&key, &[])?;
                }
                Command::Callback(callback) => callback(tx)?,
            }
        }
        debug!(
            relation = %manipulator.relation().name(),
            rows = self.rows,
            "applied insert batch"
        );
        Ok(self.rows)
    }
}

impl fmt::Debug for InsertBatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertBatch")
            .field("relation", &self.manipulator.relation().name())
            .field("rows", &self.rows)
            .field("commands", &self.commands.len())
            .finish()
    }
}
