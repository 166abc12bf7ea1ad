//! Id allocator benchmarks.
//!
//! Measures `allocate_replicated` against the number of live replicated ids,
//! and the unacked path for comparison. Each iteration allocates one id and
//! releases it again so the live count stays fixed.
//!
//! Run with: `cargo bench --bench allocator_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use scenesync_scene::entity::IdAllocator;

/// Build an allocator holding `live` replicated ids and `live` unacked ids.
fn populated(live: usize) -> IdAllocator {
    let mut ids = IdAllocator::new();
    for _ in 0..live {
        ids.allocate_replicated().unwrap();
        ids.allocate_unacked().unwrap();
    }
    ids
}

fn bench_allocate_replicated(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_replicated");
    for live in [100usize, 1_000, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let mut ids = populated(live);
            b.iter(|| {
                let id = ids.allocate_replicated().unwrap();
                ids.deallocate(black_box(id));
            });
        });
    }
    group.finish();
}

fn bench_allocate_unacked(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_unacked");
    for live in [100usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let mut ids = populated(live);
            b.iter(|| {
                let id = ids.allocate_unacked().unwrap();
                ids.deallocate(black_box(id));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allocate_replicated, bench_allocate_unacked);
criterion_main!(benches);
