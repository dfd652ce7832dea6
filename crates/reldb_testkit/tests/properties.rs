//! Property tests over random write sequences.

use proptest::prelude::*;
use reldb_core::constraint::{any, exact, starts_with, up_to, ConstraintQuery};
use reldb_core::{CoreResult, Row, ScanDirection};
use reldb_testkit::prelude::*;
use std::collections::BTreeMap;

fn keys(rows: impl Iterator<Item = CoreResult<Row>>) -> Vec<(u64, u64)> {
    rows.map(|row| {
        let row = row.unwrap();
        (u64_field(&row, "tenant"), u64_field(&row, "id"))
    })
    .collect()
}

/// Applies the writes to a plain map the same way the relation should.
fn model(ops: &[UserOp]) -> BTreeMap<(u64, u64), String> {
    let mut rows = BTreeMap::new();
    for op in ops {
        match op {
            UserOp::Insert(t, i, n) => {
                rows.entry((*t, *i)).or_insert_with(|| n.clone());
            }
            UserOp::Upsert(t, i, n) => {
                rows.insert((*t, *i), n.clone());
            }
            UserOp::Update(t, i, n) => {
                if let Some(name) = rows.get_mut(&(*t, *i)) {
                    *name = n.clone();
                }
            }
            UserOp::Remove(t, i) => {
                rows.remove(&(*t, *i));
            }
            UserOp::RemoveTenant(t) => rows.retain(|(tenant, _), _| tenant != t),
        }
    }
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn writes_keep_indexes_and_rows_in_sync(ops in user_ops_strategy(40)) {
        let fixture = TestRelation::open(users_descriptor());
        let db = fixture.manipulator();
        for op in &ops {
            op.apply(&db).unwrap();
        }
        assert_index_consistent(&db);

        let expected = model(&ops);
        prop_assert_eq!(db.count().unwrap(), expected.len() as u64);
        for ((tenant, id), name) in &expected {
            let row = db.find_by_id(&[(*tenant).into(), (*id).into()]).unwrap();
            prop_assert_eq!(str_field(&row, "name"), name.as_str());
        }

        let by_name: Vec<String> = db
            .list_by_secondary_key("by_name", &[])
            .unwrap()
            .map(|row| str_field(&row.unwrap(), "name").to_string())
            .collect();
        let mut names: Vec<String> = expected.values().cloned().collect();
        names.sort();
        prop_assert_eq!(by_name, names);
    }

    #[test]
    fn reverse_scan_mirrors_forward(
        rows in prop::collection::vec(user_row_strategy(), 0..40),
        tenant in tenant_strategy(),
        bound in id_strategy(),
        inclusive in prop::bool::ANY,
    ) {
        let fixture = TestRelation::open(users_descriptor());
        let db = fixture.manipulator();
        for row in &rows {
            db.upsert(row).unwrap();
        }
        let queries: Vec<Box<dyn Fn() -> ConstraintQuery>> = vec![
            Box::new(move || {
                ConstraintQuery::primary_key()
                    .field("tenant", exact(tenant))
                    .field("id", up_to(bound, inclusive))
            }),
            Box::new(move || {
                ConstraintQuery::primary_key()
                    .field("tenant", up_to(tenant, inclusive))
                    .field("id", any())
            }),
            Box::new(|| ConstraintQuery::secondary_key("by_name").field("name", starts_with("a"))),
        ];
        for query in &queries {
            let forward = keys(db.scan(query(), ScanDirection::Forward).unwrap());
            let mut backward = keys(db.scan_reverse(query()).unwrap());
            backward.reverse();
            prop_assert_eq!(&forward, &backward);

            let gathered = keys(db.gather(query(), 0, usize::MAX).unwrap().into_iter().map(Ok));
            prop_assert_eq!(&forward, &gathered);
        }
    }

    #[test]
    fn exact_prefix_scan_matches_model(
        rows in prop::collection::vec(user_row_strategy(), 0..40),
        tenant in tenant_strategy(),
    ) {
        let fixture = TestRelation::open(users_descriptor());
        let db = fixture.manipulator();
        let mut expected = Vec::new();
        for row in &rows {
            db.upsert(row).unwrap();
            expected.push((u64_field(row, "tenant"), u64_field(row, "id")));
        }
        expected.sort_unstable();
        expected.dedup();
        expected.retain(|(t, _)| *t == tenant);

        let query = ConstraintQuery::primary_key()
            .field("tenant", exact(tenant))
            .field("id", any());
        prop_assert_eq!(keys(db.scan(query, ScanDirection::Forward).unwrap()), expected);
    }
}
