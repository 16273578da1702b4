//! Integration tests across the service: configured rules, maintenance,
//! background refresh and concurrent access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use tiered_cache::cache::facade::{Cache, GetOptions, SetOptions};
use tiered_cache::cache::refresh::RefreshHook;
use tiered_cache::clock::ManualClock;
use tiered_cache::config::{Config, RuleConfig, TierConfig};
use tiered_cache::invalidation::rule::{InvalidationRule, RuleAction, Trigger};
use tiered_cache::service::CacheService;

/// Returns `"<key>:v<n>"` where n counts calls.
#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
}

#[async_trait]
impl RefreshHook for CountingHook {
    async fn refresh(&self, key: &str) -> anyhow::Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!(format!("{key}:v{n}")))
    }
}

struct FailingHook;

#[async_trait]
impl RefreshHook for FailingHook {
    async fn refresh(&self, key: &str) -> anyhow::Result<Value> {
        anyhow::bail!("backend unavailable for {key}")
    }
}

/// Blocks each call until the test releases a permit.
struct GatedHook {
    gate: Semaphore,
    finished: AtomicUsize,
}

impl GatedHook {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            finished: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RefreshHook for GatedHook {
    async fn refresh(&self, _key: &str) -> anyhow::Result<Value> {
        self.gate.acquire().await?.forget();
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(json!("fetched"))
    }
}

/// Panics on the first call, returns `"new"` afterwards.
#[derive(Default)]
struct FlakyHook {
    calls: AtomicUsize,
}

#[async_trait]
impl RefreshHook for FlakyHook {
    async fn refresh(&self, _key: &str) -> anyhow::Result<Value> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("backend client crashed");
        }
        Ok(json!("new"))
    }
}

fn cache_with_hook(clock: Arc<ManualClock>, hook: Arc<dyn RefreshHook>) -> Cache {
    Cache::builder(Config::default())
        .clock(clock)
        .refresh_hook(hook)
        .build()
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[test]
fn test_configured_time_rule_runs_on_tick() {
    let config = Config {
        invalidation_rules: vec![RuleConfig {
            id: Some("drop-sessions".into()),
            pattern: "session:*".into(),
            glob: true,
            trigger: Trigger::Time,
            action: RuleAction::Delete,
            enabled: true,
        }],
        ..Config::default()
    };
    let service = CacheService::init(config).unwrap();
    let cache = service.cache();
    cache.set("session:abc", "s", &SetOptions::default().tiers(["L1"]));
    cache.set("user:1", "u", &SetOptions::default().tiers(["L1"]));

    let report = service.scheduler().tick();
    assert_eq!(report.invalidated, 1);
    assert!(!cache.contains("session:abc"));
    assert!(cache.contains("user:1"));
}

#[test]
fn test_event_rules_wait_for_their_trigger() {
    let service = CacheService::init(Config::default()).unwrap();
    let cache = service.cache();
    cache.set("price:1", &10, &SetOptions::default().tiers(["L1"]));

    service
        .invalidation()
        .register(
            InvalidationRule::new("^price:", Trigger::Event)
                .unwrap()
                .with_id("prices"),
        )
        .unwrap();

    assert_eq!(service.scheduler().tick().invalidated, 0);
    assert!(cache.contains("price:1"));
    assert_eq!(service.invalidation().fire(Trigger::Event), 1);
    assert!(!cache.contains("price:1"));
}

#[test]
fn test_rule_predicate_limits_deletion() {
    let service = CacheService::init(Config::default()).unwrap();
    let cache = service.cache();
    cache.set("report:1", "a", &SetOptions::default().tiers(["L1"]));
    cache.set("report:2", "b", &SetOptions::default().tiers(["L1"]).tags(["pinned"]));

    service
        .invalidation()
        .register(
            InvalidationRule::glob("report:*", Trigger::Manual)
                .unwrap()
                .with_id("reports")
                .with_predicate(|e| !e.tags.contains("pinned")),
        )
        .unwrap();

    assert_eq!(service.invalidation().apply_rule("reports"), Some(1));
    assert!(!cache.contains("report:1"));
    assert!(cache.contains("report:2"));
}

#[test]
fn test_rule_predicate_may_read_the_cache() {
    let service = CacheService::init(Config::default()).unwrap();
    let cache = service.cache().clone();
    for key in ["doc:1", "doc:2", "pin:doc:2"] {
        cache.set(key, "d", &SetOptions::default().tiers(["L1"]));
    }

    let lookup = cache.clone();
    service
        .invalidation()
        .register(
            InvalidationRule::new("^doc:", Trigger::Manual)
                .unwrap()
                .with_id("unpinned-docs")
                .with_predicate(move |e| !lookup.contains(&format!("pin:{}", e.key))),
        )
        .unwrap();

    assert_eq!(service.invalidation().apply_rule("unpinned-docs"), Some(1));
    assert!(!cache.contains("doc:1"));
    assert!(cache.contains("doc:2"));
}

#[test]
fn test_adaptive_ttl_moves_with_hit_rate() {
    let config = Config {
        tiers: vec![
            TierConfig::new("hot", 0, 10_000),
            TierConfig::new("cold", 1, 10_000),
        ],
        ..Config::default()
    };
    let service = CacheService::init(config).unwrap();
    let cache = service.cache();

    cache.set("k", "v", &SetOptions::default().tiers(["hot"]));
    cache.get_value("k", &GetOptions::pinned("hot"));
    cache.get_value("other", &GetOptions::pinned("cold"));

    let report = service.scheduler().tick();
    assert_eq!(report.adjustments.len(), 2);
    // 100% hit rate shrinks, 0% grows.
    assert_eq!(cache.stats("hot").unwrap().default_ttl_seconds, 270);
    assert_eq!(cache.stats("cold").unwrap().default_ttl_seconds, 330);

    // New writes pick up the adjusted default.
    cache.set("k2", "v", &SetOptions::default().tiers(["cold"]));
    let entry = cache.registry().tier("cold").unwrap().peek("k2").unwrap();
    assert_eq!(entry.ttl_seconds, 330);
}

#[tokio::test]
async fn test_stale_read_triggers_refresh() {
    let clock = Arc::new(ManualClock::new(0));
    let hook = Arc::new(CountingHook::default());
    let cache = Cache::builder(Config::default())
        .clock(clock.clone())
        .refresh_hook(hook.clone())
        .build()
        .unwrap();
    cache.set("k", "original", &SetOptions::default().ttl(10).tiers(["L1"]));

    // Fresh: no refresh.
    clock.set(7_000);
    let options = GetOptions::default().refresh_if_stale();
    assert_eq!(cache.get::<String>("k", &options), Some("original".into()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 0);

    // Stale: the old value is served and a refresh runs in the background.
    clock.set(8_000);
    assert_eq!(cache.get::<String>("k", &options), Some("original".into()));
    let refreshed = wait_until(|| {
        cache.get::<String>("k", &GetOptions::default()) == Some("k:v1".to_string())
    })
    .await;
    assert!(refreshed);
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);

    // The refreshed copy restarts its lifetime.
    let entry = cache.registry().tier("L1").unwrap().peek("k").unwrap();
    assert_eq!(entry.stored_at, 8_000);
    assert_eq!(entry.ttl_seconds, 10);
}

#[tokio::test]
async fn test_failed_refresh_keeps_value() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = Cache::builder(Config::default())
        .clock(clock.clone())
        .refresh_hook(Arc::new(FailingHook))
        .build()
        .unwrap();
    cache.set("k", "original", &SetOptions::default().ttl(10).tiers(["L1"]));

    clock.set(9_000);
    let options = GetOptions::default().refresh_if_stale();
    assert_eq!(cache.get::<String>("k", &options), Some("original".into()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.get::<String>("k", &GetOptions::default()), Some("original".into()));
}

#[tokio::test]
async fn test_refresh_does_not_resurrect_deleted_key() {
    let clock = Arc::new(ManualClock::new(0));
    let hook = Arc::new(GatedHook::new());
    let cache = cache_with_hook(clock.clone(), hook.clone());
    cache.set("user:1", "original", &SetOptions::default().ttl(10).tiers(["L1"]));

    clock.set(8_000);
    let options = GetOptions::default().refresh_if_stale();
    assert_eq!(cache.get::<String>("user:1", &options), Some("original".into()));
    tokio::task::yield_now().await;
    assert!(cache.delete("user:1"));

    hook.gate.add_permits(1);
    assert!(wait_until(|| hook.finished.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!cache.contains("user:1"));
    assert_eq!(cache.aggregate_stats().entry_count, 0);
}

#[tokio::test]
async fn test_write_during_refresh_wins() {
    let clock = Arc::new(ManualClock::new(0));
    let hook = Arc::new(GatedHook::new());
    let cache = cache_with_hook(clock.clone(), hook.clone());
    cache.set("user:1", "original", &SetOptions::default().ttl(10).tiers(["L1"]));

    clock.set(8_000);
    cache.get_value("user:1", &GetOptions::default().refresh_if_stale());
    tokio::task::yield_now().await;
    cache.set("user:1", "written", &SetOptions::default().ttl(10).tiers(["L1"]));

    hook.gate.add_permits(1);
    assert!(wait_until(|| hook.finished.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.get::<String>("user:1", &GetOptions::default()), Some("written".into()));
}

#[tokio::test]
async fn test_panicking_hook_does_not_block_later_refreshes() {
    let clock = Arc::new(ManualClock::new(0));
    let hook = Arc::new(FlakyHook::default());
    let cache = cache_with_hook(clock.clone(), hook.clone());
    cache.set("k", "old", &SetOptions::default().ttl(10).tiers(["L1"]));

    clock.set(8_000);
    let options = GetOptions::default().refresh_if_stale();
    assert_eq!(cache.get::<String>("k", &options), Some("old".into()));
    assert!(wait_until(|| hook.calls.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.get::<String>("k", &GetOptions::default()), Some("old".into()));

    // The panic freed the key, so the next stale read refreshes again.
    cache.get_value("k", &options);
    let refreshed = wait_until(|| {
        cache.get::<String>("k", &GetOptions::default()) == Some("new".to_string())
    })
    .await;
    assert!(refreshed);
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_refresh_rule_uses_hook() {
    let hook = Arc::new(CountingHook::default());
    let builder = Cache::builder(Config::default()).refresh_hook(hook.clone());
    let service = CacheService::init_with(builder).unwrap();
    let cache = service.cache().clone();
    cache.set("feed:1", "old", &SetOptions::default().tiers(["L1"]));

    service
        .invalidation()
        .register(
            InvalidationRule::new("^feed:", Trigger::Dependency)
                .unwrap()
                .with_action(RuleAction::Refresh),
        )
        .unwrap();
    assert_eq!(service.invalidation().fire(Trigger::Dependency), 1);

    let refreshed = wait_until(|| {
        cache.get::<String>("feed:1", &GetOptions::pinned("L1")) == Some("feed:1:v1".to_string())
    })
    .await;
    assert!(refreshed);
    service.shutdown().await;
}

#[tokio::test]
async fn test_background_maintenance_sweeps() {
    let mut config = Config::default();
    config.maintenance.auto_start = true;
    config.maintenance.interval_secs = 1;
    let clock = Arc::new(ManualClock::new(0));
    let service =
        CacheService::init_with(Cache::builder(config).clock(clock.clone())).unwrap();
    assert!(service.is_maintenance_running());

    let cache = service.cache().clone();
    cache.set("k", "v", &SetOptions::default().ttl(1));
    clock.set(2_000);

    // The first tick runs one interval after start.
    let swept = wait_until(|| cache.stats("L1").unwrap().expirations == 1).await;
    assert!(swept);
    assert_eq!(cache.aggregate_stats().entry_count, 0);

    assert!(service.stop_maintenance().await);
    assert!(!service.is_maintenance_running());
}

#[test]
fn test_concurrent_access_respects_capacity() {
    let config = Config {
        tiers: vec![
            TierConfig::new("L1", 0, 2_000),
            TierConfig::new("L2", 1, 8_000),
        ],
        ..Config::default()
    };
    let cache = Cache::new(config).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("k{}", (t * 31 + i) % 200);
                    match i % 5 {
                        0 => {
                            cache.delete(&key);
                        }
                        1 | 2 => {
                            cache.get_value(&key, &GetOptions::default());
                        }
                        _ => {
                            cache.set(&key, &"x".repeat(i % 90), &SetOptions::default());
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for tier in cache.registry().tiers_ordered_by_priority() {
        let stats = tier.stats();
        assert!(stats.total_size_bytes <= stats.capacity_bytes);
        assert_eq!(stats.entry_count, tier.len());
    }
}
