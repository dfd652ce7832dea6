//! Schema evolution across registries sharing one store.

use reldb_codec::{FieldCodec, Value};
use reldb_core::{
    Config, CoreError, CoreResult, Record, RelationDescriptor, RelationRegistry, Row,
};
use reldb_kv::{KvTransaction, MemoryKv};
use reldb_testkit::prelude::*;

fn v1() -> RelationDescriptor {
    RelationDescriptor::new("accounts")
        .primary_key("id", FieldCodec::Unsigned)
        .value("owner", FieldCodec::String)
        .value("balance", FieldCodec::Unsigned)
}

fn account(id: u64, owner: &str, balance: u64) -> Row {
    Row::new()
        .with("id", id)
        .with("owner", owner)
        .with("balance", balance)
}

#[test]
fn old_rows_load_with_defaults_for_added_fields() {
    init_tracing();
    let fixture = TestRelation::open(v1());
    fixture.manipulator().insert(&account(1, "ada", 10)).unwrap();

    let v2 = v1()
        .value_with_default("currency", FieldCodec::String, "EUR")
        .value("frozen", FieldCodec::Bool);
    let fixture = fixture.reopen(v2);
    assert_eq!(fixture.relation.version_numbers(), vec![1, 2]);

    let db = fixture.manipulator();
    let old = db.find_by_id(&[1u64.into()]).unwrap();
    assert_eq!(str_field(&old, "owner"), "ada");
    assert_eq!(str_field(&old, "currency"), "EUR");
    assert_eq!(old.get("frozen"), Some(&Value::Bool(false)));

    db.insert(&account(2, "bob", 3).with("currency", "USD")).unwrap();
    let new = db.find_by_id(&[2u64.into()]).unwrap();
    assert_eq!(str_field(&new, "currency"), "USD");
}

#[test]
fn removed_fields_disappear_and_widened_fields_convert() {
    let fixture = TestRelation::open(v1());
    fixture.manipulator().insert(&account(1, "ada", 10)).unwrap();

    let v2 = RelationDescriptor::new("accounts")
        .primary_key("id", FieldCodec::Unsigned)
        .value("balance", FieldCodec::Signed);
    let fixture = fixture.reopen(v2);
    let row = fixture.manipulator().find_by_id(&[1u64.into()]).unwrap();
    assert_eq!(row.get("owner"), None);
    assert_eq!(row.get("balance"), Some(&Value::Signed(10)));
}

#[test]
fn unchanged_layout_reuses_version() {
    let fixture = TestRelation::open(v1());
    let fixture = fixture.reopen(v1());
    assert_eq!(fixture.relation.version_numbers(), vec![1]);
    assert_eq!(fixture.relation.current().version().as_u64(), 1);
}

#[test]
fn primary_key_changes_are_rejected() {
    let store = MemoryKv::new();
    let tx = store.begin();
    RelationRegistry::new(Config::default())
        .register(tx.as_ref(), v1())
        .unwrap();
    tx.commit().unwrap();

    let changed = RelationDescriptor::new("accounts")
        .primary_key("id", FieldCodec::String)
        .value("owner", FieldCodec::String);
    let tx = store.begin();
    let err = RelationRegistry::new(Config::default())
        .register(tx.as_ref(), changed)
        .unwrap_err();
    assert!(matches!(err, CoreError::PrimaryKeyChanged { .. }));
}

#[test]
fn added_secondary_key_is_backfilled() {
    let fixture = TestRelation::open(v1());
    let db = fixture.manipulator();
    db.insert(&account(1, "ada", 10)).unwrap();
    db.insert(&account(2, "bob", 10)).unwrap();
    drop(db);

    let fixture = fixture.reopen(v1().secondary_key("by_owner", &["owner"]));
    let db = fixture.manipulator();
    assert_index_consistent(&db);
    let bob = db.find_by_secondary_key("by_owner", &["bob".into()]).unwrap();
    assert_eq!(u64_field(&bob, "id"), 2);

    let sk = fixture.relation.require_secondary_key("by_owner").unwrap();
    let prefix = fixture.relation.secondary_key_prefix(sk);
    assert_eq!(fixture.tx.count_with_prefix(&prefix).unwrap(), 2);
    drop(db);

    // Dropping it again erases its entries.
    let fixture = fixture.reopen(v1());
    assert_eq!(fixture.tx.count_with_prefix(&prefix).unwrap(), 0);
}

#[test]
fn secondary_key_over_rows_of_an_older_version() {
    let fixture = TestRelation::open(v1().secondary_key("by_owner", &["owner"]));
    fixture.manipulator().insert(&account(1, "ada", 10)).unwrap();

    let v2 = v1()
        .value("note", FieldCodec::String)
        .secondary_key("by_owner", &["owner"]);
    let fixture = fixture.reopen(v2);
    let db = fixture.manipulator();
    db.update(&account(1, "eve", 10).with("note", "moved")).unwrap();
    assert_index_consistent(&db);
    assert!(db
        .find_by_secondary_key_or_default("by_owner", &["ada".into()])
        .unwrap()
        .is_none());
}

#[derive(Debug, PartialEq)]
struct Account {
    id: u64,
    owner: String,
    balance: u64,
}

impl Record for Account {
    fn descriptor() -> RelationDescriptor {
        v1()
    }

    fn to_row(&self) -> Row {
        account(self.id, &self.owner, self.balance)
    }

    fn from_row(row: &Row) -> CoreResult<Self> {
        let field = |name: &str| {
            row.get(name)
                .ok_or_else(|| CoreError::field_mismatch(format!("missing field {name}")))
        };
        Ok(Self {
            id: field("id")?.as_u64().unwrap_or_default(),
            owner: field("owner")?.as_str().unwrap_or_default().to_string(),
            balance: field("balance")?.as_u64().unwrap_or_default(),
        })
    }
}

#[test]
fn typed_records_round_trip_through_rows() {
    let fixture = TestRelation::open(Account::descriptor());
    let db = fixture.manipulator();
    let ada = Account {
        id: 1,
        owner: "ada".to_string(),
        balance: 10,
    };
    assert!(db.upsert_record(&ada).unwrap());
    assert_eq!(db.find_record::<Account>(&[1u64.into()]).unwrap(), Some(ada));
    assert_eq!(db.find_record::<Account>(&[2u64.into()]).unwrap(), None);
}
