//! Benchmark `AttributeStore` set/get/keys at varying attribute-bag sizes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::Value as Json;

use ironorm::model::AttributeStore;

fn filled(n: usize) -> AttributeStore {
    let mut store = AttributeStore::new();
    for i in 0..n {
        store.set(format!("col{i}"), Json::from(i as i64));
    }
    store
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_store/set");

    for n in [8, 32, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(filled(n)));
        });
    }

    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_store/get_hit");

    for n in [8, 32, 128, 512] {
        let store = filled(n);
        let key = format!("col{}", n / 2);
        group.bench_with_input(BenchmarkId::from_parameter(n), &(store, key), |b, (store, key)| {
            b.iter(|| black_box(store.get(key)));
        });
    }

    group.finish();
}

fn bench_keys_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_store/keys_iterate");

    for n in [8, 32, 128, 512] {
        let store = filled(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &store, |b, store| {
            b.iter(|| {
                for k in store.keys() {
                    black_box(k);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get_hit, bench_keys_iterate);
criterion_main!(benches);
