//! Test fixtures and relation helpers.
//!
//! Provides an in-memory store with a registered relation and a few
//! ready-made layouts used across the integration tests.

use reldb_codec::{FieldCodec, Value};
use reldb_core::{
    Config, RelationDbManipulator, RelationDescriptor, RelationInfo, RelationRegistry, Row,
};
use reldb_kv::{KvTransaction, MemoryKv, MemoryTransaction};
use std::collections::BTreeSet;
use std::sync::Arc;

/// An in-memory store with one registered relation.
pub struct TestRelation {
    /// The store, shared with every transaction of the fixture.
    pub store: MemoryKv,
    /// The registry the relation is registered with.
    pub registry: RelationRegistry,
    /// The open transaction.
    pub tx: Arc<MemoryTransaction>,
    /// The registered relation.
    pub relation: Arc<RelationInfo>,
}

impl TestRelation {
    /// Registers `descriptor` in a fresh store with the default config.
    pub fn open(descriptor: RelationDescriptor) -> Self {
        Self::open_with(Config::default(), descriptor)
    }

    /// Registers `descriptor` in a fresh store.
    pub fn open_with(config: Config, descriptor: RelationDescriptor) -> Self {
        Self::attach(MemoryKv::new(), config, descriptor)
    }

    /// Registers `descriptor` against the committed content of `store`.
    pub fn attach(store: MemoryKv, config: Config, descriptor: RelationDescriptor) -> Self {
        let tx = store.begin();
        let registry = RelationRegistry::new(config);
        let relation = registry
            .register(tx.as_ref(), descriptor)
            .expect("Failed to register relation");
        Self {
            store,
            registry,
            tx,
            relation,
        }
    }

    /// The open transaction as a trait object.
    pub fn transaction(&self) -> Arc<dyn KvTransaction> {
        self.tx.clone()
    }

    /// A manipulator over the open transaction.
    pub fn manipulator(&self) -> RelationDbManipulator {
        self.registry.manipulator(self.transaction(), &self.relation)
    }

    /// Commits and opens the store again with a new registry, as a process
    /// restart would.
    pub fn reopen(self, descriptor: RelationDescriptor) -> Self {
        let config = self.registry.config().clone();
        self.tx.commit().expect("Failed to commit");
        Self::attach(self.store, config, descriptor)
    }
}

/// `users(tenant, id) -> name` with secondary key `by_name(name)`.
pub fn users_descriptor() -> RelationDescriptor {
    RelationDescriptor::new("users")
        .primary_key("tenant", FieldCodec::Unsigned)
        .primary_key("id", FieldCodec::Unsigned)
        .value("name", FieldCodec::String)
        .secondary_key("by_name", &["name"])
}

/// A row of [`users_descriptor`].
pub fn user_row(tenant: u64, id: u64, name: &str) -> Row {
    Row::new()
        .with("tenant", tenant)
        .with("id", id)
        .with("name", name)
}

/// `items(company, date, id) -> title, price` with secondary key
/// `by_price(company, price)`.
pub fn items_descriptor() -> RelationDescriptor {
    RelationDescriptor::new("items")
        .primary_key("company", FieldCodec::Unsigned)
        .primary_key("date", FieldCodec::DateTime)
        .primary_key("id", FieldCodec::Unsigned)
        .value("title", FieldCodec::String)
        .value("price", FieldCodec::Signed)
        .secondary_key("by_price", &["company", "price"])
}

/// A row of [`items_descriptor`].
pub fn item_row(company: u64, date: i64, id: u64, title: &str, price: i64) -> Row {
    Row::new()
        .with("company", company)
        .with("date", Value::DateTime(date))
        .with("id", id)
        .with("title", title)
        .with("price", price)
}

/// Reads a `u64` field of a row.
pub fn u64_field(row: &Row, name: &str) -> u64 {
    row.get(name)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("field {name} is not an unsigned integer"))
}

/// Reads a string field of a row.
pub fn str_field<'a>(row: &'a Row, name: &str) -> &'a str {
    row.get(name)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("field {name} is not a string"))
}

/// Asserts that the entries of every secondary key are exactly the entries
/// derived from the stored rows.
pub fn assert_index_consistent(db: &RelationDbManipulator) {
    let relation = db.relation();
    let tx = db.transaction();
    let rows: Vec<(Vec<u8>, Vec<u8>)> = {
        let mut cursor = tx.create_cursor().expect("Failed to open cursor");
        let mut rows = Vec::new();
        let mut found = cursor
            .find_first_key(relation.row_prefix())
            .expect("Failed to seek");
        while found {
            rows.push((
                cursor.key().expect("No key").to_vec(),
                cursor.value().expect("No value"),
            ));
            found = cursor
                .find_next_key(relation.row_prefix())
                .expect("Failed to step");
        }
        rows
    };

    for sk in relation.current().secondary_keys() {
        let expected: BTreeSet<Vec<u8>> = rows
            .iter()
            .map(|(key, value)| {
                relation
                    .secondary_key_entry(sk, key, value)
                    .expect("Failed to derive entry")
            })
            .collect();

        let prefix = relation.secondary_key_prefix(sk);
        let mut actual = BTreeSet::new();
        let mut cursor = tx.create_cursor().expect("Failed to open cursor");
        let mut found = cursor.find_first_key(&prefix).expect("Failed to seek");
        while found {
            actual.insert(cursor.key().expect("No key").to_vec());
            found = cursor.find_next_key(&prefix).expect("Failed to step");
        }
        assert_eq!(
            actual, expected,
            "secondary key {} disagrees with the rows",
            sk.name
        );
    }
}
