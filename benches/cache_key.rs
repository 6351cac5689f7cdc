//! Benchmarks for cache key generation and store access
//!
//! This benchmark measures:
//! - Canonical key derivation over flat and nested parameter maps
//! - Sorted-key serialization overhead as parameter count grows
//! - Cache store set/get round trips on the in-memory backend

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use query_runtime::cache::{CacheStore, KeyGenerator};
use query_runtime::QueryParams;

fn flat_params(fields: usize) -> QueryParams {
    let mut params = QueryParams::new();
    for i in 0..fields {
        params.insert(format!("field_{i:03}"), json!(i));
    }
    params
}

fn nested_params() -> QueryParams {
    match json!({
        "page": 3,
        "page_size": 50,
        "filter": {
            "status": ["open", "in_review"],
            "assignee": { "team": "infra", "name": "kim" },
            "labels": ["bug", "p1", "needs-triage"]
        },
        "sort": { "field": "updated_at", "direction": "desc" }
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn bench_key_generation(c: &mut Criterion) {
    let generator = KeyGenerator::new();

    let mut group = c.benchmark_group("key_generation");
    for fields in [4, 16, 64] {
        let params = flat_params(fields);
        group.throughput(Throughput::Elements(fields as u64));
        group.bench_with_input(BenchmarkId::new("flat", fields), &params, |b, params| {
            b.iter(|| generator.generate(black_box("list_items"), black_box(params)).unwrap());
        });
    }
    group.finish();

    let params = nested_params();
    c.bench_function("key_generation/nested", |b| {
        b.iter(|| generator.generate(black_box("search"), black_box(&params)).unwrap());
    });

    let salted = KeyGenerator::new().with_salt("tenant-a");
    c.bench_function("key_generation/nested_salted", |b| {
        b.iter(|| salted.generate(black_box("search"), black_box(&params)).unwrap());
    });
}

fn bench_store_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let generator = KeyGenerator::new();
    let key = generator.generate("bench", &nested_params()).unwrap();
    let store = CacheStore::in_memory(1024);
    let value = json!({ "id": 1, "payload": "x".repeat(256) });

    c.bench_function("store/set_get", |b| {
        b.to_async(&rt).iter(|| async {
            store.set(&key, value.clone()).await.unwrap();
            black_box(
                store
                    .get(&key, Duration::from_secs(60))
                    .await
                    .unwrap()
                    .unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_key_generation, bench_store_round_trip);
criterion_main!(benches);
