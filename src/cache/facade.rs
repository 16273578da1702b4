//! The public cache API: get/set/delete/invalidate/warm/stats across all tiers.
//!
//! Writes are write-through: `set` reaches every target tier before it
//! returns. Reads walk tiers fastest first and copy hot entries into faster
//! tiers (promotion). Tiers are locked one at a time; there is no global
//! ordering across tiers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::compressor::{Compressor, ZstdCompressor};
use crate::cache::entry::{Entry, EntryState};
use crate::cache::refresh::RefreshHook;
use crate::cache::registry::TierRegistry;
use crate::cache::serializer::{SerializationError, Serializer};
use crate::cache::stats::CacheStats;
use crate::cache::tier::{Tier, TierHit, TierRead};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, PromotionConfig};
use crate::error::CacheError;
use crate::invalidation::pattern::Pattern;

/// Options for [`Cache::get`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Start the tier walk here instead of at the fastest tier.
    pub preferred_tier: Option<String>,
    /// Continue into slower tiers after `preferred_tier` misses.
    pub fallback_to_slower_tiers: bool,
    /// Schedule the refresh hook when the entry is stale.
    pub refresh_if_stale: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            preferred_tier: None,
            fallback_to_slower_tiers: true,
            refresh_if_stale: false,
        }
    }
}

impl GetOptions {
    /// Read only from `tier`.
    pub fn pinned(tier: impl Into<String>) -> Self {
        Self {
            preferred_tier: Some(tier.into()),
            fallback_to_slower_tiers: false,
            ..Default::default()
        }
    }

    /// Start at `tier`, falling back to slower tiers.
    pub fn starting_at(tier: impl Into<String>) -> Self {
        Self {
            preferred_tier: Some(tier.into()),
            ..Default::default()
        }
    }

    pub fn refresh_if_stale(mut self) -> Self {
        self.refresh_if_stale = true;
        self
    }
}

/// Options for [`Cache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Defaults to each tier's current default TTL.
    pub ttl_seconds: Option<u64>,
    pub tags: Vec<String>,
    /// Defaults to every tier.
    pub target_tiers: Option<Vec<String>>,
    pub metadata: HashMap<String, Value>,
}

impl SetOptions {
    pub fn ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn tiers<I, S>(mut self, tiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_tiers = Some(tiers.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Options for [`Cache::invalidate`]. An entry is removed when its key
/// matches `pattern` or its tags intersect `tags`.
#[derive(Debug, Clone, Default)]
pub struct InvalidateOptions {
    /// Regex matched against keys.
    pub pattern: Option<String>,
    pub tags: Vec<String>,
    /// Defaults to every tier.
    pub tier: Option<String>,
}

impl InvalidateOptions {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn in_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// A tier a `set` could not write to.
#[derive(Debug)]
pub struct TierFailure {
    pub tier: String,
    pub error: CacheError,
}

/// Per-tier result of a write-through `set`.
#[derive(Debug, Default)]
pub struct SetOutcome {
    pub stored: Vec<String>,
    pub failures: Vec<TierFailure>,
}

impl SetOutcome {
    /// At least one target tier holds the value.
    pub fn is_success(&self) -> bool {
        !self.stored.is_empty()
    }
}

/// One item of a bulk preload.
#[derive(Debug, Clone)]
pub struct WarmEntry {
    pub key: String,
    pub value: Value,
    pub options: SetOptions,
}

impl WarmEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            options: SetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }
}

/// Builds a [`Cache`] from configuration plus optional strategy overrides.
pub struct CacheBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    refresh_hook: Option<Arc<dyn RefreshHook>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
    compressors: HashMap<String, Arc<dyn Compressor>>,
}

impl CacheBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            refresh_hook: None,
            serializers: HashMap::new(),
            compressors: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_hook(mut self, hook: Arc<dyn RefreshHook>) -> Self {
        self.refresh_hook = Some(hook);
        self
    }

    /// Replace the serializer chosen by the tier's configured format.
    pub fn serializer(mut self, tier: impl Into<String>, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.insert(tier.into(), serializer);
        self
    }

    /// Replace the default zstd compressor of a tier.
    pub fn compressor(mut self, tier: impl Into<String>, compressor: Arc<dyn Compressor>) -> Self {
        self.compressors.insert(tier.into(), compressor);
        self
    }

    pub fn build(mut self) -> Result<Cache, CacheError> {
        self.config.validate()?;

        for name in self.serializers.keys().chain(self.compressors.keys()) {
            if !self.config.tiers.iter().any(|t| &t.name == name) {
                return Err(CacheError::Configuration(format!(
                    "strategy override for unknown tier {name}"
                )));
            }
        }

        let zstd_level = self.config.compression.zstd_level;
        let tiers = self
            .config
            .tiers
            .iter()
            .map(|tier_config| {
                let serializer = self
                    .serializers
                    .remove(&tier_config.name)
                    .unwrap_or_else(|| tier_config.serialization_format.serializer());
                let compressor = self
                    .compressors
                    .remove(&tier_config.name)
                    .unwrap_or_else(|| Arc::new(ZstdCompressor::new(zstd_level)));
                Tier::new(tier_config.clone(), serializer, compressor)
            })
            .collect();
        let registry = TierRegistry::new(tiers)?;

        info!(
            tiers = ?registry.names(),
            promotion_threshold = self.config.promotion.threshold,
            "Cache constructed"
        );

        Ok(Cache {
            inner: Arc::new(CacheInner {
                registry,
                clock: self.clock,
                promotion: self.config.promotion.clone(),
                refresh_hook: self.refresh_hook,
                refreshing: Mutex::new(HashSet::new()),
            }),
        })
    }
}

/// The entry a refresh replaces, and what the replacement keeps from it.
struct RefreshTarget {
    tier: Arc<Tier>,
    sequence: u64,
    ttl_seconds: u64,
    tags: BTreeSet<String>,
    metadata: HashMap<String, Value>,
}

/// A key's place in the in-flight refresh set. Released on drop, so a
/// panicking hook cannot block later refreshes of the key.
struct RefreshSlot {
    inner: Arc<CacheInner>,
    key: String,
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        self.inner.refreshing.lock().remove(&self.key);
    }
}

struct CacheInner {
    registry: TierRegistry,
    clock: Arc<dyn Clock>,
    promotion: PromotionConfig,
    refresh_hook: Option<Arc<dyn RefreshHook>>,
    /// Keys with a refresh task in flight.
    refreshing: Mutex<HashSet<String>>,
}

/// Handle to a multi-tier cache. Cloning is cheap and shares the tiers.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("tiers", &self.inner.registry.names())
            .finish()
    }
}

impl Cache {
    pub fn new(config: Config) -> Result<Self, CacheError> {
        CacheBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> CacheBuilder {
        CacheBuilder::new(config)
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.inner.registry
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Read `key` and deserialize it as `T`. A miss is `None`, never an error.
    pub fn get<T: DeserializeOwned>(&self, key: &str, options: &GetOptions) -> Option<T> {
        let value = self.get_value(key, options)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, "Cached value has an unexpected shape: {e}");
                None
            }
        }
    }

    /// Read `key` as a JSON value.
    pub fn get_value(&self, key: &str, options: &GetOptions) -> Option<Value> {
        let registry = &self.inner.registry;
        let tiers = registry.tiers_ordered_by_priority();

        let start = match options.preferred_tier.as_deref() {
            Some(name) => match registry.position(name) {
                Some(idx) => idx,
                None => {
                    warn!(tier = name, key, "Unknown preferred tier");
                    return None;
                }
            },
            None => 0,
        };
        let end = if options.preferred_tier.is_some() && !options.fallback_to_slower_tiers {
            start + 1
        } else {
            tiers.len()
        };

        let now = self.now_ms();
        for (idx, tier) in tiers.iter().enumerate().take(end).skip(start) {
            match tier.read(key, now, self.inner.promotion.stale_factor) {
                TierRead::Hit(hit) => {
                    if hit.access_count > self.inner.promotion.threshold && idx > 0 {
                        self.promote(key, &hit, &tiers[..idx], now);
                    }
                    if options.refresh_if_stale && hit.state == EntryState::Stale {
                        self.spawn_refresh(key, tier, &hit);
                    }
                    return Some(hit.value);
                }
                TierRead::Miss => {}
                TierRead::Expired => {
                    debug!(tier = %tier.name(), key, "Dropped expired entry on read");
                }
                TierRead::Corrupt(e) => {
                    warn!(tier = %tier.name(), key, "Treating undecodable entry as a miss: {e}");
                }
            }
        }
        None
    }

    /// Whether any tier holds a live entry for `key`. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.now_ms();
        self.inner
            .registry
            .tiers_ordered_by_priority()
            .iter()
            .any(|t| t.contains_live(key, now))
    }

    /// Copy a hot entry into every faster tier that does not hold it yet.
    ///
    /// Best-effort: failures are logged and skipped. The copy keeps the
    /// original `stored_at` and TTL so promotion never extends a lifetime.
    fn promote(&self, key: &str, hit: &TierHit, faster: &[Arc<Tier>], now: u64) {
        for tier in faster {
            let entry = tier
                .build_entry(key, &hit.value, hit.ttl_seconds, hit.stored_at)
                .map(|mut e| {
                    e.last_accessed_at = now;
                    e.tags = hit.tags.clone();
                    e.metadata = hit.metadata.clone();
                    e
                });
            let result = entry.and_then(|e| tier.promote(e, now));
            match result {
                Ok(true) => debug!(tier = %tier.name(), key, "Promoted entry"),
                Ok(false) => {}
                Err(e) => debug!(tier = %tier.name(), key, "Promotion skipped: {e}"),
            }
        }
    }

    fn spawn_refresh(&self, key: &str, tier: &Arc<Tier>, hit: &TierHit) {
        let target = RefreshTarget {
            tier: tier.clone(),
            sequence: hit.sequence,
            ttl_seconds: hit.ttl_seconds,
            tags: hit.tags.clone(),
            metadata: hit.metadata.clone(),
        };
        self.schedule_refresh(key, target);
    }

    /// Ask the refresh hook for a new value of `key` held in `tier`, keeping
    /// the entry's TTL and tags. Returns whether a refresh was scheduled.
    ///
    /// The new value only replaces the exact entry seen here: if the key is
    /// deleted, invalidated, expired or rewritten meanwhile, it is discarded.
    pub fn refresh_entry(&self, tier: &Arc<Tier>, key: &str) -> bool {
        let Some(entry) = tier.peek(key) else {
            return false;
        };
        let target = RefreshTarget {
            tier: tier.clone(),
            sequence: entry.sequence,
            ttl_seconds: entry.ttl_seconds,
            tags: entry.tags,
            metadata: entry.metadata,
        };
        self.schedule_refresh(key, target)
    }

    fn schedule_refresh(&self, key: &str, target: RefreshTarget) -> bool {
        let Some(hook) = self.inner.refresh_hook.clone() else {
            debug!(key, "No refresh hook configured");
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key, "No async runtime available, skipping refresh");
            return false;
        };
        if !self.inner.refreshing.lock().insert(key.to_string()) {
            return false;
        }
        let slot = RefreshSlot {
            inner: self.inner.clone(),
            key: key.to_string(),
        };

        let cache = self.clone();
        runtime.spawn(async move {
            let key = slot.key.clone();
            let fetch = {
                let key = key.clone();
                tokio::spawn(async move { hook.refresh(&key).await })
            };
            match fetch.await {
                Ok(Ok(value)) => cache.store_refreshed(&key, value, target),
                Ok(Err(e)) => warn!(key = %key, "Refresh hook failed: {e}"),
                Err(e) => warn!(key = %key, "Refresh hook panicked: {e}"),
            }
            drop(slot);
        });
        true
    }

    fn store_refreshed(&self, key: &str, value: Value, target: RefreshTarget) {
        let now = self.now_ms();
        let tier = &target.tier;
        let result = tier
            .build_entry(key, &value, target.ttl_seconds, now)
            .and_then(|entry| {
                let entry = entry.with_tags(target.tags).with_metadata(target.metadata);
                tier.replace_if_current(entry, target.sequence, now)
            });
        match result {
            Ok(true) => debug!(tier = %tier.name(), key, "Refreshed stale entry"),
            Ok(false) => debug!(tier = %tier.name(), key, "Entry changed during refresh, value discarded"),
            Err(e) => warn!(tier = %tier.name(), key, "Refreshed value could not be stored: {e}"),
        }
    }

    /// Write `value` through to every target tier.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &SetOptions) -> SetOutcome {
        match serde_json::to_value(value) {
            Ok(value) => self.set_value(key, value, options),
            Err(e) => {
                warn!(key, "Value could not be serialized: {e}");
                let failures = self
                    .target_names(options)
                    .into_iter()
                    .map(|tier| TierFailure {
                        tier,
                        error: SerializationError::Conversion(e.to_string()).into(),
                    })
                    .collect();
                SetOutcome {
                    stored: Vec::new(),
                    failures,
                }
            }
        }
    }

    fn target_names(&self, options: &SetOptions) -> Vec<String> {
        match &options.target_tiers {
            Some(names) => names.clone(),
            None => self.inner.registry.names(),
        }
    }

    /// Write a JSON value through to every target tier.
    ///
    /// Failures are isolated per tier; the write succeeds if any tier stored it.
    pub fn set_value(&self, key: &str, value: Value, options: &SetOptions) -> SetOutcome {
        let now = self.now_ms();
        let ttl = options.ttl_seconds.unwrap_or(0);
        let mut outcome = SetOutcome::default();

        for name in self.target_names(options) {
            let Some(tier) = self.inner.registry.tier(&name) else {
                warn!(tier = %name, key, "Set targeted an unknown tier");
                outcome.failures.push(TierFailure {
                    error: CacheError::UnknownTier(name.clone()),
                    tier: name,
                });
                continue;
            };

            let result = tier.build_entry(key, &value, ttl, now).and_then(|entry| {
                let entry = entry
                    .with_tags(options.tags.iter().cloned())
                    .with_metadata(options.metadata.clone());
                tier.insert(entry)
            });
            match result {
                Ok(_) => outcome.stored.push(name),
                Err(error) => {
                    warn!(tier = %name, key, "Set failed: {error}");
                    outcome.failures.push(TierFailure { tier: name, error });
                }
            }
        }
        outcome
    }

    /// Remove `key` from every tier. Returns whether any tier held it.
    pub fn delete(&self, key: &str) -> bool {
        let mut found = false;
        for tier in self.inner.registry.tiers_ordered_by_priority() {
            found |= tier.remove(key);
        }
        found
    }

    /// Remove every entry from one tier, or from all tiers.
    pub fn clear(&self, tier: Option<&str>) -> Result<usize, CacheError> {
        let cleared = self
            .selected_tiers(tier)?
            .iter()
            .map(|t| t.clear())
            .sum();
        info!(tier = tier.unwrap_or("*"), cleared, "Cache cleared");
        Ok(cleared)
    }

    fn selected_tiers(&self, tier: Option<&str>) -> Result<Vec<Arc<Tier>>, CacheError> {
        match tier {
            Some(name) => self
                .inner
                .registry
                .tier(name)
                .map(|t| vec![t.clone()])
                .ok_or_else(|| CacheError::UnknownTier(name.to_string())),
            None => Ok(self.inner.registry.tiers_ordered_by_priority().to_vec()),
        }
    }

    /// Remove entries whose key matches the pattern or whose tags intersect
    /// the given tags. Scans every live entry of the selected tiers.
    pub fn invalidate(&self, options: &InvalidateOptions) -> Result<usize, CacheError> {
        let pattern = options.pattern.as_deref().map(Pattern::new).transpose()?;
        self.invalidate_matching(options.tier.as_deref(), pattern.as_ref(), &options.tags)
    }

    /// [`Cache::invalidate`] with an already compiled pattern.
    pub fn invalidate_matching(
        &self,
        tier: Option<&str>,
        pattern: Option<&Pattern>,
        tags: &[String],
    ) -> Result<usize, CacheError> {
        let tiers = self.selected_tiers(tier)?;
        if pattern.is_none() && tags.is_empty() {
            return Ok(0);
        }

        let matches = |e: &Entry| pattern.is_some_and(|p| p.is_match(&e.key)) || e.has_any_tag(tags);
        let removed: usize = tiers.iter().map(|t| t.remove_where(&matches)).sum();

        info!(
            pattern = pattern.map(Pattern::as_str),
            tags = ?tags,
            removed,
            "Invalidated entries"
        );
        Ok(removed)
    }

    /// Remove every entry, in every tier, matching `predicate`.
    pub fn remove_where(&self, predicate: impl Fn(&Entry) -> bool) -> usize {
        self.inner
            .registry
            .tiers_ordered_by_priority()
            .iter()
            .map(|t| t.remove_where(&predicate))
            .sum()
    }

    /// Attach `tag` to every entry, in every tier, matching `predicate`.
    pub fn tag_where(&self, tag: &str, predicate: impl Fn(&Entry) -> bool) -> usize {
        self.inner
            .registry
            .tiers_ordered_by_priority()
            .iter()
            .map(|t| t.tag_where(tag, &predicate))
            .sum()
    }

    /// Schedule a refresh for every entry matching `predicate`.
    pub fn refresh_where(&self, predicate: impl Fn(&Entry) -> bool) -> usize {
        let mut scheduled = 0;
        for tier in self.inner.registry.tiers_ordered_by_priority() {
            for key in tier.keys_where(&predicate) {
                if self.refresh_entry(tier, &key) {
                    scheduled += 1;
                }
            }
        }
        scheduled
    }

    /// Preload many entries. Returns how many were stored in at least one tier.
    pub fn warm_cache(&self, entries: impl IntoIterator<Item = WarmEntry>) -> usize {
        let mut attempted = 0;
        let mut warmed = 0;
        for entry in entries {
            attempted += 1;
            if self.set_value(&entry.key, entry.value, &entry.options).is_success() {
                warmed += 1;
            }
        }
        info!(attempted, warmed, "Cache warmed");
        warmed
    }

    /// Statistics of one tier.
    pub fn stats(&self, tier: &str) -> Option<CacheStats> {
        self.inner.registry.tier(tier).map(|t| t.stats())
    }

    /// Statistics of every tier, by name.
    pub fn all_stats(&self) -> BTreeMap<String, CacheStats> {
        self.inner
            .registry
            .tiers_ordered_by_priority()
            .iter()
            .map(|t| (t.name().to_string(), t.stats()))
            .collect()
    }

    /// Statistics of all tiers combined.
    pub fn aggregate_stats(&self) -> CacheStats {
        CacheStats::aggregate(self.all_stats().values())
    }
}
