//! Property-based test generators using proptest.
//!
//! Keys are drawn from small domains so that generated write sequences
//! collide often: upserts overwrite, removals hit, and secondary key values
//! repeat.

use crate::fixtures::user_row;
use proptest::prelude::*;
use reldb_codec::Value;
use reldb_core::{CoreResult, RelationDbManipulator, Row};

/// A write against [`users_descriptor`](crate::fixtures::users_descriptor).
#[derive(Debug, Clone)]
pub enum UserOp {
    /// Insert, ignoring duplicate key failures.
    Insert(u64, u64, String),
    /// Insert or replace.
    Upsert(u64, u64, String),
    /// Replace, ignoring missing rows.
    Update(u64, u64, String),
    /// Remove one row.
    Remove(u64, u64),
    /// Remove every row of a tenant.
    RemoveTenant(u64),
}

impl UserOp {
    /// Applies the write.
    pub fn apply(&self, db: &RelationDbManipulator) -> CoreResult<()> {
        match self {
            UserOp::Insert(tenant, id, name) => match db.insert(&user_row(*tenant, *id, name)) {
                Err(reldb_core::CoreError::DuplicateKey { .. }) => Ok(()),
                other => other,
            },
            UserOp::Upsert(tenant, id, name) => {
                db.upsert(&user_row(*tenant, *id, name)).map(|_| ())
            }
            UserOp::Update(tenant, id, name) => match db.update(&user_row(*tenant, *id, name)) {
                Err(err) if err.is_not_found() => Ok(()),
                other => other,
            },
            UserOp::Remove(tenant, id) => db
                .remove_by_id(&[Value::from(*tenant), Value::from(*id)])
                .map(|_| ()),
            UserOp::RemoveTenant(tenant) => db
                .remove_by_primary_key_prefix(&[Value::from(*tenant)])
                .map(|_| ()),
        }
    }
}

/// Strategy for tenant ids.
pub fn tenant_strategy() -> impl Strategy<Value = u64> {
    1u64..4
}

/// Strategy for row ids within a tenant.
pub fn id_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![0u64..8, Just(u64::MAX), 250u64..260]
}

/// Strategy for names, including empty strings and embedded zero bytes.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[a-c]{0,3}").expect("Invalid regex"),
        Just("a\u{0}b".to_string()),
        Just(String::new()),
    ]
}

/// Strategy for user rows.
pub fn user_row_strategy() -> impl Strategy<Value = Row> {
    (tenant_strategy(), id_strategy(), name_strategy())
        .prop_map(|(tenant, id, name)| user_row(tenant, id, &name))
}

/// Strategy for a single write.
pub fn user_op_strategy() -> impl Strategy<Value = UserOp> {
    prop_oneof![
        3 => (tenant_strategy(), id_strategy(), name_strategy())
            .prop_map(|(t, i, n)| UserOp::Insert(t, i, n)),
        3 => (tenant_strategy(), id_strategy(), name_strategy())
            .prop_map(|(t, i, n)| UserOp::Upsert(t, i, n)),
        2 => (tenant_strategy(), id_strategy(), name_strategy())
            .prop_map(|(t, i, n)| UserOp::Update(t, i, n)),
        2 => (tenant_strategy(), id_strategy()).prop_map(|(t, i)| UserOp::Remove(t, i)),
        1 => tenant_strategy().prop_map(UserOp::RemoveTenant),
    ]
}

/// Strategy for write sequences.
pub fn user_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<UserOp>> {
    prop::collection::vec(user_op_strategy(), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{assert_index_consistent, users_descriptor, TestRelation};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn generated_ops_apply(ops in user_ops_strategy(24)) {
            let fixture = TestRelation::open(users_descriptor());
            let db = fixture.manipulator();
            for op in &ops {
                op.apply(&db).unwrap();
            }
            assert_index_consistent(&db);
        }
    }
}
