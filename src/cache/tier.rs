//! A single storage tier: a named, prioritized bucket with its own capacity,
//! eviction policy and default TTL.
//!
//! All mutable state (entries and counters) sits behind one mutex per tier.
//! Every operation takes that lock for its full duration, so operations
//! within a tier are linearizable. No method ever holds two tier locks, and
//! caller-supplied predicates are evaluated on a copy with the lock released.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::compressor::Compressor;
use crate::cache::entry::{Entry, EntryState};
use crate::cache::evictor::{EvictionPolicy, Evictor};
use crate::cache::serializer::Serializer;
use crate::cache::stats::{CacheStats, TierCounters};
use crate::config::TierConfig;
use crate::error::CacheError;

/// Lock-protected part of a tier.
#[derive(Debug, Default)]
pub struct TierState {
    pub(crate) entries: HashMap<String, Entry>,
    pub(crate) counters: TierCounters,
    pub(crate) default_ttl_seconds: u64,
    next_sequence: u64,
}

impl TierState {
    fn take(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.counters.remove_entry(entry.size_bytes);
        Some(entry)
    }
}

/// A successful read from one tier.
#[derive(Debug, Clone)]
pub struct TierHit {
    pub value: Value,
    /// Access count after this read.
    pub access_count: u64,
    pub stored_at: u64,
    pub ttl_seconds: u64,
    pub state: EntryState,
    pub tags: BTreeSet<String>,
    pub metadata: HashMap<String, Value>,
    /// Identifies the stored entry this hit came from.
    pub(crate) sequence: u64,
}

/// Outcome of looking a key up in one tier.
#[derive(Debug)]
pub enum TierRead {
    Hit(TierHit),
    Miss,
    /// The entry had expired and was dropped.
    Expired,
    /// The entry could not be decoded and was dropped.
    Corrupt(CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertKind {
    Set,
    Promotion,
}

pub struct Tier {
    config: TierConfig,
    evictor: Evictor,
    serializer: Arc<dyn Serializer>,
    compressor: Arc<dyn Compressor>,
    state: Mutex<TierState>,
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.config.name)
            .field("priority", &self.config.priority)
            .field("policy", &self.evictor.policy())
            .finish()
    }
}

impl Tier {
    pub fn new(
        config: TierConfig,
        serializer: Arc<dyn Serializer>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        let state = TierState {
            default_ttl_seconds: config.default_ttl_seconds,
            ..Default::default()
        };
        Self {
            evictor: Evictor::new(config.eviction_policy),
            config,
            serializer,
            compressor,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    pub fn capacity_bytes(&self) -> usize {
        self.config.capacity_bytes
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.evictor.policy()
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Current default TTL (adjusted by maintenance).
    pub fn default_ttl_seconds(&self) -> u64 {
        self.state.lock().default_ttl_seconds
    }

    pub fn set_default_ttl_seconds(&self, ttl_seconds: u64) {
        self.state.lock().default_ttl_seconds = ttl_seconds;
    }

    /// Encode `value` into an entry for this tier.
    ///
    /// A `ttl_seconds` of zero selects the tier's current default TTL.
    pub fn build_entry(
        &self,
        key: &str,
        value: &Value,
        ttl_seconds: u64,
        now_ms: u64,
    ) -> Result<Entry, CacheError> {
        let encoded = self.serializer.encode(value)?;
        let (bytes, compressed) = if self.config.compression_enabled {
            (self.compressor.compress(&encoded)?, true)
        } else {
            (encoded, false)
        };
        let ttl = if ttl_seconds == 0 {
            self.default_ttl_seconds()
        } else {
            ttl_seconds
        };
        Ok(Entry::new(key, bytes, compressed, ttl, now_ms))
    }

    /// Decode an entry's stored bytes back into a value.
    pub fn decode(&self, entry: &Entry) -> Result<Value, CacheError> {
        if entry.compressed {
            let raw = self.compressor.decompress(&entry.value)?;
            Ok(self.serializer.decode(&raw)?)
        } else {
            Ok(self.serializer.decode(&entry.value)?)
        }
    }

    /// Look up `key`, recording a hit or a miss.
    ///
    /// Expired and undecodable entries are dropped and count as misses.
    pub fn read(&self, key: &str, now_ms: u64, stale_factor: f64) -> TierRead {
        let started = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let outcome = match state.entries.get_mut(key) {
            None => TierRead::Miss,
            Some(entry) if entry.is_expired(now_ms) => TierRead::Expired,
            Some(entry) => match self.decode(entry) {
                Err(e) => TierRead::Corrupt(e),
                Ok(value) => {
                    entry.touch(now_ms);
                    TierRead::Hit(TierHit {
                        value,
                        access_count: entry.access_count,
                        stored_at: entry.stored_at,
                        ttl_seconds: entry.ttl_seconds,
                        state: entry.state(now_ms, stale_factor),
                        tags: entry.tags.clone(),
                        metadata: entry.metadata.clone(),
                        sequence: entry.sequence,
                    })
                }
            },
        };

        match &outcome {
            TierRead::Expired => {
                state.take(key);
                state.counters.expirations += 1;
            }
            TierRead::Corrupt(_) => {
                state.take(key);
            }
            _ => {}
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if matches!(outcome, TierRead::Hit(_)) {
            state.counters.record_hit(elapsed_ms);
        } else {
            state.counters.record_miss(elapsed_ms);
        }
        outcome
    }

    /// Whether a non-expired entry for `key` is present. Does not count as an access.
    pub fn contains_live(&self, key: &str, now_ms: u64) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now_ms))
    }

    /// A copy of the stored entry, without touching it.
    pub fn peek(&self, key: &str) -> Option<Entry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Store `entry`, replacing any entry with the same key and evicting
    /// others as needed to stay within capacity. Returns the number evicted.
    pub fn insert(&self, entry: Entry) -> Result<usize, CacheError> {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, entry, InsertKind::Set)
    }

    /// Store a promoted copy unless a live entry for the key already exists.
    ///
    /// Returns `Ok(false)` when the tier already held the key.
    pub fn promote(&self, entry: Entry, now_ms: u64) -> Result<bool, CacheError> {
        let mut state = self.state.lock();
        if state
            .entries
            .get(&entry.key)
            .is_some_and(|e| !e.is_expired(now_ms))
        {
            return Ok(false);
        }
        self.insert_locked(&mut state, entry, InsertKind::Promotion)?;
        Ok(true)
    }

    /// Store `entry` in place of the live entry with insertion number
    /// `expected_sequence`. Returns `Ok(false)` and stores nothing when that
    /// entry has since been removed, expired or overwritten.
    pub fn replace_if_current(
        &self,
        entry: Entry,
        expected_sequence: u64,
        now_ms: u64,
    ) -> Result<bool, CacheError> {
        let mut state = self.state.lock();
        let current = state
            .entries
            .get(&entry.key)
            .is_some_and(|e| e.sequence == expected_sequence && !e.is_expired(now_ms));
        if !current {
            return Ok(false);
        }
        self.insert_locked(&mut state, entry, InsertKind::Set)?;
        Ok(true)
    }

    fn insert_locked(
        &self,
        state: &mut TierState,
        mut entry: Entry,
        kind: InsertKind,
    ) -> Result<usize, CacheError> {
        let capacity = self.config.capacity_bytes;
        if entry.size_bytes > capacity {
            return Err(CacheError::EvictionExhausted {
                tier: self.config.name.clone(),
                needed: entry.size_bytes,
                capacity,
            });
        }

        state.take(&entry.key);

        let needed = (state.counters.total_size_bytes + entry.size_bytes).saturating_sub(capacity);
        let evicted = if needed > 0 {
            self.evictor.evict(&self.config.name, state, needed).evicted
        } else {
            0
        };
        if state.counters.total_size_bytes + entry.size_bytes > capacity {
            return Err(CacheError::EvictionExhausted {
                tier: self.config.name.clone(),
                needed,
                capacity,
            });
        }

        entry.sequence = state.next_sequence;
        state.next_sequence += 1;
        state.counters.add_entry(entry.size_bytes);
        match kind {
            InsertKind::Set => state.counters.sets += 1,
            InsertKind::Promotion => state.counters.promotions += 1,
        }
        debug!(
            tier = %self.config.name,
            key = %entry.key,
            size = entry.size_bytes,
            evicted,
            "Stored entry"
        );
        state.entries.insert(entry.key.clone(), entry);
        Ok(evicted)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if state.take(key).is_some() {
            state.counters.deletes += 1;
            true
        } else {
            false
        }
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in &keys {
            state.take(key);
        }
        state.counters.deletes += keys.len() as u64;
        keys.len()
    }

    /// Key and insertion number of every entry matching `predicate`.
    ///
    /// The predicate sees a copy of the entries and runs without the tier
    /// lock, so it may call back into the cache.
    fn matching(&self, predicate: impl Fn(&Entry) -> bool) -> Vec<(String, u64)> {
        let snapshot: Vec<Entry> = self.state.lock().entries.values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|e| predicate(e))
            .map(|e| (e.key, e.sequence))
            .collect()
    }

    /// Remove every entry matching `predicate`. Entries written after the
    /// match was taken are left alone.
    pub fn remove_where(&self, predicate: impl Fn(&Entry) -> bool) -> usize {
        let matched = self.matching(predicate);
        if matched.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        let mut removed = 0;
        for (key, sequence) in &matched {
            if state.entries.get(key).is_some_and(|e| e.sequence == *sequence) {
                state.take(key);
                removed += 1;
            }
        }
        state.counters.deletes += removed as u64;
        removed
    }

    /// Attach `tag` to every entry matching `predicate`. Returns how many
    /// entries gained the tag.
    pub fn tag_where(&self, tag: &str, predicate: impl Fn(&Entry) -> bool) -> usize {
        let matched = self.matching(predicate);
        if matched.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        let mut tagged = 0;
        for (key, sequence) in &matched {
            if let Some(entry) = state.entries.get_mut(key) {
                if entry.sequence == *sequence && entry.tags.insert(tag.to_string()) {
                    tagged += 1;
                }
            }
        }
        tagged
    }

    /// Keys of every entry matching `predicate`.
    pub fn keys_where(&self, predicate: impl Fn(&Entry) -> bool) -> Vec<String> {
        self.matching(predicate).into_iter().map(|(key, _)| key).collect()
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.is_expired(now_ms))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            state.take(key);
        }
        state.counters.expirations += expired.len() as u64;
        expired.len()
    }

    /// Evict entries by policy until `bytes_to_free` bytes are freed or the
    /// tier is empty. Returns the number evicted.
    pub fn evict(&self, bytes_to_free: usize) -> usize {
        let mut state = self.state.lock();
        self.evictor
            .evict(&self.config.name, &mut state, bytes_to_free)
            .evicted
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        state
            .counters
            .snapshot(self.config.capacity_bytes, state.default_ttl_seconds)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
