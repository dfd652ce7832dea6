//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use reldb_codec::FieldCodec;
use reldb_core::{Config, RelationDbManipulator, RelationDescriptor, RelationRegistry, Row};
use reldb_kv::MemoryKv;

/// `events(tenant, seq) -> kind, payload` with secondary key `by_kind`.
pub fn events_descriptor() -> RelationDescriptor {
    RelationDescriptor::new("events")
        .primary_key("tenant", FieldCodec::Unsigned)
        .primary_key("seq", FieldCodec::Unsigned)
        .value("kind", FieldCodec::String)
        .value("payload", FieldCodec::Bytes)
        .secondary_key("by_kind", &["kind"])
}

/// Event kinds, cycled through by [`event_row`].
pub const KINDS: [&str; 4] = ["click", "open", "scroll", "view"];

/// Generates a deterministic event row.
pub fn event_row(tenant: u64, seq: u64, payload_size: usize) -> Row {
    let kind = KINDS[(seq % KINDS.len() as u64) as usize];
    let payload: Vec<u8> = (0..payload_size).map(|i| (seq as usize + i) as u8).collect();
    Row::new()
        .with("tenant", tenant)
        .with("seq", seq)
        .with("kind", kind)
        .with("payload", payload)
}

/// Opens an empty events relation.
pub fn empty_events() -> RelationDbManipulator {
    let tx = MemoryKv::new().begin();
    let registry = RelationRegistry::new(Config::default());
    let relation = registry
        .register(tx.as_ref(), events_descriptor())
        .expect("Failed to register relation");
    registry.manipulator(tx, &relation)
}

/// Opens an events relation with `tenants * per_tenant` rows.
pub fn populated_events(tenants: u64, per_tenant: u64) -> RelationDbManipulator {
    let db = empty_events();
    let mut batch = db.insert_batch();
    for tenant in 0..tenants {
        for seq in 0..per_tenant {
            batch
                .serialize_insert(&event_row(tenant, seq, 32))
                .expect("Failed to stage row");
        }
    }
    batch.apply().expect("Failed to apply batch");
    db
}
