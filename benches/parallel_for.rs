//! Fork-join dispatch cost using criterion.
//!
//! Measures the per-frame overhead of `run_parallel` on an empty body and
//! the throughput of a typical entity update at several pool sizes.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use frameweave::{ForkJoinPool, PinningStrategy, PoolConfig};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};

const ENTITIES: usize = 10_000;

/// One dispatch and join with no work; the floor cost of a frame step.
fn bench_dispatch_overhead(c: &mut Criterion) {
    let workers = frameweave::topology::logical_processors();
    let mut pool = ForkJoinPool::new(workers).unwrap();
    let sink = AtomicU64::new(0);

    c.bench_function("dispatch_empty_body", |b| {
        b.iter(|| {
            pool.run_parallel(&sink, 0..workers, |_, i| {
                black_box(i);
            })
            .unwrap();
        })
    });
}

#[derive(Clone, Copy, Default)]
struct Unit {
    position: [f32; 2],
    velocity: [f32; 2],
}

/// Integrate positions for a crowd of units.
fn bench_entity_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_update");
    group.throughput(Throughput::Elements(ENTITIES as u64));

    let max = frameweave::topology::logical_processors();
    for workers in [1, 2, 4, 8, 16].into_iter().filter(|&w| w <= max) {
        let mut pool = ForkJoinPool::with_config(PoolConfig {
            workers,
            pinning: PinningStrategy::AvoidSMT,
            ..PoolConfig::default()
        })
        .unwrap();
        let mut units = vec![
            Unit {
                position: [0.0, 0.0],
                velocity: [1.0, 0.5],
            };
            ENTITIES
        ];

        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| {
                pool.for_each_mut(&mut units, |unit, _| {
                    unit.position[0] += unit.velocity[0] * 0.016;
                    unit.position[1] += unit.velocity[1] * 0.016;
                })
                .unwrap();
            })
        });
        black_box(units[0].position);
    }

    group.finish();
}

/// Sum over a shared read-only collection.
fn bench_shared_read(c: &mut Criterion) {
    let mut pool = ForkJoinPool::new(frameweave::topology::logical_processors()).unwrap();
    let data: Vec<u64> = (0..ENTITIES as u64).collect();
    let total = AtomicU64::new(0);

    let mut group = c.benchmark_group("shared_read");
    group.throughput(Throughput::Elements(ENTITIES as u64));
    group.bench_function("sum", |b| {
        b.iter(|| {
            total.store(0, Ordering::Relaxed);
            pool.run_parallel(&data, 0..data.len(), |data, i| {
                total.fetch_add(data[i], Ordering::Relaxed);
            })
            .unwrap();
            black_box(total.load(Ordering::Relaxed));
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_overhead,
    bench_entity_update,
    bench_shared_read
);
criterion_main!(benches);
