//! Eviction policy behaviour observed through the public cache API.

use std::sync::Arc;

use tiered_cache::cache::evictor::EvictionPolicy;
use tiered_cache::cache::facade::{Cache, GetOptions, SetOptions};
use tiered_cache::cache::serializer::SerializationFormat;
use tiered_cache::clock::ManualClock;
use tiered_cache::config::{Config, TierConfig};
use tiered_cache::error::CacheError;

/// One raw-format tier of 300 bytes: room for three 100-byte values.
fn single_tier(policy: EvictionPolicy) -> (Cache, Arc<ManualClock>) {
    let config = Config {
        tiers: vec![TierConfig {
            eviction_policy: policy,
            serialization_format: SerializationFormat::Raw,
            ..TierConfig::new("L1", 0, 300)
        }],
        ..Config::default()
    };
    let clock = Arc::new(ManualClock::new(0));
    let cache = Cache::builder(config).clock(clock.clone()).build().unwrap();
    (cache, clock)
}

fn value() -> String {
    "v".repeat(100)
}

fn put(cache: &Cache, key: &str) {
    assert!(cache.set(key, &value(), &SetOptions::default()).is_success());
}

fn read(cache: &Cache, key: &str) {
    assert!(cache.get_value(key, &GetOptions::default()).is_some());
}

#[test]
fn test_lru_evicts_least_recently_read() {
    let (cache, clock) = single_tier(EvictionPolicy::Lru);
    put(&cache, "a");
    clock.set(1);
    put(&cache, "b");
    clock.set(2);
    put(&cache, "c");
    clock.set(3);
    read(&cache, "a");

    clock.set(4);
    put(&cache, "d");
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert!(cache.contains("d"));
}

#[test]
fn test_lfu_evicts_least_read() {
    let (cache, _clock) = single_tier(EvictionPolicy::Lfu);
    put(&cache, "a");
    put(&cache, "b");
    put(&cache, "c");
    for _ in 0..3 {
        read(&cache, "a");
    }
    read(&cache, "c");

    put(&cache, "d");
    assert!(!cache.contains("b"));
    assert!(cache.contains("a"));
    assert!(cache.contains("c"));
}

#[test]
fn test_fifo_ignores_reads() {
    let (cache, clock) = single_tier(EvictionPolicy::Fifo);
    put(&cache, "a");
    clock.set(1);
    put(&cache, "b");
    clock.set(2);
    put(&cache, "c");
    for _ in 0..4 {
        read(&cache, "a");
    }

    put(&cache, "d");
    assert!(!cache.contains("a"));
    assert!(cache.contains("b"));
}

#[test]
fn test_ttl_policy_evicts_soonest_expiry() {
    let (cache, _clock) = single_tier(EvictionPolicy::Ttl);
    cache.set("long", &value(), &SetOptions::default().ttl(600));
    cache.set("short", &value(), &SetOptions::default().ttl(60));
    cache.set("mid", &value(), &SetOptions::default().ttl(300));

    put(&cache, "new");
    assert!(!cache.contains("short"));
    assert!(cache.contains("long"));
    assert!(cache.contains("mid"));
}

#[test]
fn test_ties_break_by_insertion_order() {
    for policy in [
        EvictionPolicy::Lru,
        EvictionPolicy::Lfu,
        EvictionPolicy::Fifo,
        EvictionPolicy::Ttl,
    ] {
        let (cache, _clock) = single_tier(policy);
        put(&cache, "first");
        put(&cache, "second");
        put(&cache, "third");

        put(&cache, "fourth");
        assert!(!cache.contains("first"), "{policy} should evict the first insert");
        assert!(cache.contains("second"), "{policy}");
    }
}

#[test]
fn test_large_write_evicts_several() {
    let (cache, _clock) = single_tier(EvictionPolicy::Fifo);
    put(&cache, "a");
    put(&cache, "b");
    put(&cache, "c");

    assert!(cache.set("big", &"x".repeat(250), &SetOptions::default()).is_success());
    let stats = cache.stats("L1").unwrap();
    assert_eq!(stats.evictions, 3);
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.total_size_bytes, 250);
}

#[test]
fn test_oversized_write_fails_without_evicting() {
    let (cache, _clock) = single_tier(EvictionPolicy::Lru);
    put(&cache, "a");

    let outcome = cache.set("huge", &"x".repeat(301), &SetOptions::default());
    assert!(!outcome.is_success());
    assert!(matches!(
        outcome.failures[0].error,
        CacheError::EvictionExhausted { .. }
    ));
    assert!(cache.contains("a"));
    assert_eq!(cache.stats("L1").unwrap().evictions, 0);
}

#[test]
fn test_overwrite_reuses_space() {
    let (cache, _clock) = single_tier(EvictionPolicy::Lru);
    put(&cache, "a");
    put(&cache, "b");
    put(&cache, "c");
    put(&cache, "b");

    let stats = cache.stats("L1").unwrap();
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.entry_count, 3);
    assert_eq!(stats.total_size_bytes, 300);
}
