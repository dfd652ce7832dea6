//! End-to-end scans over the users and items relations.

use reldb_core::constraint::{any, exact, starts_with, up_to, up_to_then_next, ConstraintQuery};
use reldb_core::{
    CoreResult, EnumerationOrder, KeyProposition, KeyRange, QueryTarget, Row, ScanDirection,
};
use reldb_kv::KvTransaction;
use reldb_testkit::prelude::*;
use std::sync::Arc;

fn collect(rows: impl Iterator<Item = CoreResult<Row>>) -> Vec<Row> {
    rows.collect::<CoreResult<Vec<_>>>().unwrap()
}

fn triples(rows: &[Row]) -> Vec<(u64, u64, String)> {
    rows.iter()
        .map(|row| {
            (
                u64_field(row, "tenant"),
                u64_field(row, "id"),
                str_field(row, "name").to_string(),
            )
        })
        .collect()
}

fn seeded_users() -> TestRelation {
    init_tracing();
    let fixture = TestRelation::open(users_descriptor());
    let db = fixture.manipulator();
    db.insert(&user_row(1, 1, "a")).unwrap();
    db.insert(&user_row(1, 2, "b")).unwrap();
    db.insert(&user_row(2, 1, "c")).unwrap();
    fixture
}

#[test]
fn exact_tenant_never_reads_other_tenants() {
    let fixture = seeded_users();
    let recording = RecordingTransaction::new(fixture.transaction());
    let tx: Arc<dyn KvTransaction> = recording.clone();
    let db = fixture.registry.manipulator(tx, &fixture.relation);
    recording.clear();

    let query = ConstraintQuery::primary_key()
        .field("tenant", exact(1u64))
        .field("id", any());
    let rows = collect(db.scan(query, ScanDirection::Forward).unwrap());

    assert_eq!(
        triples(&rows),
        vec![(1, 1, "a".to_string()), (1, 2, "b".to_string())]
    );
    let tenant_two = fixture.relation.encode_key(&[2u64.into()]).unwrap();
    assert!(!recording.visited().is_empty());
    assert!(!recording.visited_prefix(&tenant_two));
}

#[test]
fn secondary_prefix_follows_updates() {
    let fixture = seeded_users();
    let db = fixture.manipulator();
    let query = || ConstraintQuery::secondary_key("by_name").field("name", starts_with("a"));

    let rows = collect(db.scan(query(), ScanDirection::Forward).unwrap());
    assert_eq!(triples(&rows), vec![(1, 1, "a".to_string())]);

    db.update(&user_row(1, 1, "x")).unwrap();
    assert!(collect(db.scan(query(), ScanDirection::Forward).unwrap()).is_empty());
    assert!(db
        .find_by_secondary_key_or_default("by_name", &["a".into()])
        .unwrap()
        .is_none());
    assert_index_consistent(&db);
}

#[test]
fn reverse_scan_is_forward_reversed() {
    let fixture = seeded_users();
    let db = fixture.manipulator();
    db.insert(&user_row(1, 3, "ab")).unwrap();
    let query = || {
        ConstraintQuery::primary_key()
            .field("tenant", up_to(1u64, true))
            .field("id", any())
    };
    let forward = triples(&collect(db.scan(query(), ScanDirection::Forward).unwrap()));
    let mut backward = triples(&collect(db.scan_reverse(query()).unwrap()));
    backward.reverse();
    assert_eq!(forward.len(), 3);
    assert_eq!(forward, backward);
}

#[test]
fn tuple_upper_bound_over_two_fields() {
    let fixture = TestRelation::open(items_descriptor());
    let db = fixture.manipulator();
    for (date, id) in [(10, 1), (10, 2), (20, 1), (20, 2), (20, 3), (30, 1)] {
        db.insert(&item_row(7, date, id, "t", 5)).unwrap();
    }
    db.insert(&item_row(8, 10, 1, "other", 5)).unwrap();

    // (date, id) <= (20, 2) lexicographically.
    let query = || {
        ConstraintQuery::primary_key()
            .field("company", exact(7u64))
            .field("date", up_to_then_next(reldb_codec::Value::DateTime(20)))
            .field("id", up_to(2u64, true))
    };
    let keys = |rows: Vec<Row>| -> Vec<(i64, u64)> {
        rows.iter()
            .map(|row| {
                let date = match row.get("date") {
                    Some(reldb_codec::Value::DateTime(d)) => *d,
                    other => panic!("unexpected date {other:?}"),
                };
                (date, u64_field(row, "id"))
            })
            .collect()
    };
    let forward = keys(collect(db.scan(query(), ScanDirection::Forward).unwrap()));
    assert_eq!(forward, vec![(10, 1), (10, 2), (20, 1), (20, 2)]);

    let mut backward = keys(collect(db.scan_reverse(query()).unwrap()));
    backward.reverse();
    assert_eq!(backward, forward);
}

#[test]
fn secondary_scan_over_signed_prices() {
    let fixture = TestRelation::open(items_descriptor());
    let db = fixture.manipulator();
    for (id, price) in [(1, -5), (2, 0), (3, 12), (4, 40)] {
        db.insert(&item_row(1, 100, id, "t", price)).unwrap();
    }
    db.insert(&item_row(2, 100, 9, "t", -100)).unwrap();

    let query = ConstraintQuery::secondary_key("by_price")
        .field("company", exact(1u64))
        .field("price", up_to(12i64, false));
    let ids: Vec<u64> = collect(db.scan(query, ScanDirection::Forward).unwrap())
        .iter()
        .map(|row| u64_field(row, "id"))
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn gather_pages_match_incremental_scan() {
    let fixture = TestRelation::open(users_descriptor());
    let db = fixture.manipulator();
    for tenant in 1..=3u64 {
        for id in 0..20u64 {
            db.insert(&user_row(tenant, id, &format!("n{}", id % 4))).unwrap();
        }
    }
    let query = || {
        ConstraintQuery::primary_key()
            .field("tenant", up_to(2u64, true))
            .field("id", up_to(15u64, false))
    };
    let all = triples(&collect(db.scan(query(), ScanDirection::Forward).unwrap()));
    assert_eq!(all.len(), 30);

    let mut paged = Vec::new();
    for page in 0..4 {
        paged.extend(triples(&db.gather(query(), page * 8, 8).unwrap()));
    }
    assert_eq!(paged, all);
}

#[test]
fn advanced_range_positions() {
    let fixture = seeded_users();
    let db = fixture.manipulator();
    for id in 3..=6 {
        db.insert(&user_row(1, id, "z")).unwrap();
    }

    let range = KeyRange::prefix(vec![1u64.into()])
        .start(vec![2u64.into()], KeyProposition::Included)
        .end(vec![5u64.into()], KeyProposition::Excluded);
    let mut rows = db.range(&QueryTarget::PrimaryKey, range.clone()).unwrap();
    assert_eq!(rows.key_count(), 3);
    let ids: Vec<u64> = collect(&mut rows).iter().map(|r| u64_field(r, "id")).collect();
    assert_eq!(ids, vec![2, 3, 4]);

    let mut rows = db
        .range(
            &QueryTarget::PrimaryKey,
            range.order(EnumerationOrder::Descending),
        )
        .unwrap();
    assert!(rows.set_position(1).unwrap());
    assert_eq!(u64_field(&rows.current().unwrap(), "id"), 3);
    assert_eq!(rows.position().unwrap(), 1);
    assert!(!rows.set_position(3).unwrap());
}

#[test]
fn listing_by_prefix_and_secondary_key() {
    let fixture = seeded_users();
    let db = fixture.manipulator();
    db.insert(&user_row(2, 2, "a")).unwrap();

    let tenant_one = collect(db.list_by_primary_key_prefix(&[1u64.into()]).unwrap());
    assert_eq!(triples(&tenant_one).len(), 2);

    let named_a = triples(&collect(db.list_by_secondary_key("by_name", &["a".into()]).unwrap()));
    assert_eq!(named_a, vec![(1, 1, "a".to_string()), (2, 2, "a".to_string())]);

    let newest_first = triples(&collect(
        db.list_by_secondary_key("by_name", &[]).unwrap().reversed(),
    ));
    assert_eq!(newest_first.first().map(|t| t.2.as_str()), Some("c"));
}
