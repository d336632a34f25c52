//! Benchmarks the shuffle-shard computation itself, mirroring the
//! `[[bench]]` targets carried for other hot internal algorithms.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use querier_broker::shuffle_shard::{compute_assignment, shuffle_shard_seed};
use querier_broker::{TenantId, WorkerId};

fn workers(n: usize) -> Vec<WorkerId> {
    (0..n).map(|i| WorkerId::new(format!("q{i:05}"))).collect()
}

fn bench_compute_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle_shard");
    let seed = shuffle_shard_seed(&TenantId::new("bench-tenant"), "");

    for pool_size in [16usize, 256, 4096] {
        let pool = workers(pool_size);
        let max_queriers = (pool_size / 8).max(1) as u32;
        let mut scratch = Vec::new();

        group.bench_with_input(
            BenchmarkId::new("compute_assignment", pool_size),
            &pool,
            |b, pool| {
                b.iter(|| {
                    black_box(compute_assignment(seed, max_queriers, pool, &mut scratch));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compute_assignment);
criterion_main!(benches);
