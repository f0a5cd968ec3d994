//! Benchmark for ConsedMap vs standard BTreeMap.
//!
//! Measures the cost of hash-consed inserts against Rust's standard
//! BTreeMap, and the constant-time operations the canonicalization buys:
//! clone and same-factory equality.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::collections::BTreeMap;
use treecons::consed::MapFactory;

// =============================================================================
// insert Benchmark
// =============================================================================

fn benchmark_insert(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("insert");

    for size in [100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("ConsedMap", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let factory = MapFactory::new();
                    let mut map = factory.make([]);
                    for index in 0..size {
                        map.insert(black_box(index), black_box(index * 2));
                    }
                    black_box(map)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("BTreeMap", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let mut map = BTreeMap::new();
                    for index in 0..size {
                        map.insert(black_box(index), black_box(index * 2));
                    }
                    black_box(map)
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// get Benchmark
// =============================================================================

fn benchmark_get(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("get");

    for size in [100, 1000, 10000] {
        let factory = MapFactory::new();
        let consed_map = factory.make((0..size).map(|index| (index, index * 2)));
        let btree_map: BTreeMap<i32, i32> = (0..size).map(|index| (index, index * 2)).collect();

        group.bench_with_input(
            BenchmarkId::new("ConsedMap", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    for index in 0..size {
                        black_box(consed_map.get(&index));
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("BTreeMap", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    for index in 0..size {
                        black_box(btree_map.get(&index));
                    }
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// clone + equality Benchmark
// =============================================================================

fn benchmark_clone_and_equality(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("clone_and_eq");

    for size in [100, 1000, 10000] {
        let factory = MapFactory::new();
        let consed_map = factory.make((0..size).map(|index| (index, index * 2)));
        let consed_twin = factory.make((0..size).rev().map(|index| (index, index * 2)));
        let btree_map: BTreeMap<i32, i32> = (0..size).map(|index| (index, index * 2)).collect();
        let btree_twin = btree_map.clone();

        group.bench_with_input(
            BenchmarkId::new("ConsedMap/clone", size),
            &size,
            |bencher, _| {
                bencher.iter(|| black_box(consed_map.clone()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("BTreeMap/clone", size),
            &size,
            |bencher, _| {
                bencher.iter(|| black_box(btree_map.clone()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("ConsedMap/eq", size),
            &size,
            |bencher, _| {
                bencher.iter(|| black_box(consed_map == consed_twin));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("BTreeMap/eq", size),
            &size,
            |bencher, _| {
                bencher.iter(|| black_box(btree_map == btree_twin));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_insert,
    benchmark_get,
    benchmark_clone_and_equality
);
criterion_main!(benches);
