//! Benchmarks for the cache hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use tiered_cache::cache::compressor::{Compressor, ZstdCompressor};
use tiered_cache::cache::entry::Entry;
use tiered_cache::cache::evictor::{EvictionPolicy, Evictor};
use tiered_cache::cache::facade::{Cache, GetOptions, SetOptions};
use tiered_cache::config::Config;
use tiered_cache::invalidation::pattern::Pattern;

fn bench_eviction_selection(c: &mut Criterion) {
    // 10,000 entries of 128 bytes with spread-out access patterns.
    let entries: Vec<Entry> = (0..10_000u64)
        .map(|i| {
            let mut e = Entry::new(format!("k{i}"), vec![0u8; 128], false, 60 + i % 600, i);
            e.last_accessed_at = (i * 7919) % 10_000;
            e.access_count = i % 97;
            e
        })
        .collect();

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu] {
        let evictor = Evictor::new(policy);
        c.bench_function(&format!("eviction_select_{policy}_100_from_10k"), |b| {
            b.iter(|| {
                let victims = evictor.select_victims(black_box(entries.iter()), 100 * 128);
                black_box(victims);
            })
        });
    }
}

fn bench_compression(c: &mut Criterion) {
    let compressor = ZstdCompressor::default();
    let data = serde_json::to_vec(&json!({
        "rows": (0..1_000).map(|i| json!({"id": i, "name": format!("row {i}")})).collect::<Vec<_>>()
    }))
    .unwrap();

    c.bench_function("zstd_compress_json_rows", |b| {
        b.iter(|| black_box(compressor.compress(black_box(&data)).unwrap()))
    });
}

fn bench_set_get(c: &mut Criterion) {
    let cache = Cache::new(Config::default()).unwrap();
    let value = json!({"name": "Alice", "roles": ["admin", "dev"]});
    for i in 0..1_000 {
        cache.set(&format!("user:{i}"), &value, &SetOptions::default().tiers(["L1"]));
    }

    c.bench_function("set_l1", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            cache.set(&format!("user:{}", i % 1_000), &value, &SetOptions::default().tiers(["L1"]))
        })
    });

    c.bench_function("get_hit_l1", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(cache.get_value(&format!("user:{}", i % 1_000), &GetOptions::default()))
        })
    });

    c.bench_function("get_miss_all_tiers", |b| {
        b.iter(|| black_box(cache.get_value("absent", &GetOptions::default())))
    });
}

fn bench_pattern_match(c: &mut Criterion) {
    let pattern = Pattern::glob("session:*:cart").unwrap();
    let keys: Vec<String> = (0..1_000).map(|i| format!("session:{i}:cart")).collect();

    c.bench_function("glob_match_1k_keys", |b| {
        b.iter(|| keys.iter().filter(|k| pattern.is_match(k)).count())
    });
}

criterion_group!(
    benches,
    bench_eviction_selection,
    bench_compression,
    bench_set_get,
    bench_pattern_match,
);
criterion_main!(benches);
