//! Constraint scan benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reldb_core::constraint::{any, exact, starts_with, up_to, ConstraintQuery};
use reldb_core::ScanDirection;
use reldb_bench::populated_events;

fn tenant_query(tenant: u64) -> ConstraintQuery {
    ConstraintQuery::primary_key()
        .field("tenant", exact(tenant))
        .field("seq", any())
}

/// Incremental scan versus fast gather over one tenant.
fn bench_scan_vs_gather(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_scan");

    for per_tenant in [100u64, 1000, 10000].iter() {
        let db = populated_events(4, *per_tenant);
        group.throughput(Throughput::Elements(*per_tenant));

        group.bench_with_input(BenchmarkId::new("move_next", per_tenant), per_tenant, |b, _| {
            b.iter(|| {
                let rows = db.scan(tenant_query(black_box(2)), ScanDirection::Forward).unwrap();
                black_box(rows.count())
            });
        });
        group.bench_with_input(BenchmarkId::new("fast_gather", per_tenant), per_tenant, |b, _| {
            b.iter(|| {
                let rows = db.gather(tenant_query(black_box(2)), 0, usize::MAX).unwrap();
                black_box(rows.len())
            });
        });
    }
    group.finish();
}

/// A selective bound on the inner field, where seeking skips most keys.
fn bench_selective_inner_bound(c: &mut Criterion) {
    let mut group = c.benchmark_group("inner_bound");
    let db = populated_events(64, 1000);

    for direction in [ScanDirection::Forward, ScanDirection::Backward] {
        group.bench_function(format!("{direction:?}"), |b| {
            b.iter(|| {
                let query = ConstraintQuery::primary_key()
                    .field("tenant", any())
                    .field("seq", up_to(black_box(10u64), false));
                let rows = db.scan(query, direction).unwrap();
                black_box(rows.count())
            });
        });
    }
    group.finish();
}

/// Prefix scan over a secondary key.
fn bench_secondary_prefix(c: &mut Criterion) {
    let db = populated_events(8, 1000);
    c.bench_function("secondary_prefix", |b| {
        b.iter(|| {
            let query = ConstraintQuery::secondary_key("by_kind").field("kind", starts_with("sc"));
            let rows = db.scan(query, ScanDirection::Forward).unwrap();
            black_box(rows.count())
        });
    });
}

criterion_group!(
    benches,
    bench_scan_vs_gather,
    bench_selective_inner_bound,
    bench_secondary_prefix
);
criterion_main!(benches);
