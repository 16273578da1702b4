//! Per-tier counters and the snapshots handed out by `Cache::stats`.

use serde::Serialize;

/// Live counters kept under the tier lock.
#[derive(Debug, Clone, Default)]
pub struct TierCounters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub total_size_bytes: usize,
    pub entry_count: usize,
    pub avg_response_time_ms: f64,
}

impl TierCounters {
    pub fn record_hit(&mut self, elapsed_ms: f64) {
        self.hits += 1;
        self.record_response_time(elapsed_ms);
    }

    pub fn record_miss(&mut self, elapsed_ms: f64) {
        self.misses += 1;
        self.record_response_time(elapsed_ms);
    }

    /// Running mean over all lookups (hits + misses).
    fn record_response_time(&mut self, elapsed_ms: f64) {
        let n = (self.hits + self.misses) as f64;
        self.avg_response_time_ms += (elapsed_ms - self.avg_response_time_ms) / n;
    }

    pub fn add_entry(&mut self, size: usize) {
        self.entry_count += 1;
        self.total_size_bytes += size;
    }

    pub fn remove_entry(&mut self, size: usize) {
        self.entry_count = self.entry_count.saturating_sub(1);
        self.total_size_bytes = self.total_size_bytes.saturating_sub(size);
    }

    pub fn snapshot(&self, capacity_bytes: usize, default_ttl_seconds: u64) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            evictions: self.evictions,
            expirations: self.expirations,
            promotions: self.promotions,
            total_size_bytes: self.total_size_bytes,
            entry_count: self.entry_count,
            capacity_bytes,
            default_ttl_seconds,
            avg_response_time_ms: self.avg_response_time_ms,
            hit_rate: hit_rate(self.hits, self.misses),
            miss_rate: miss_rate(self.hits, self.misses),
        }
    }
}

/// Hits as a percentage of lookups; 0 when nothing has been looked up.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64 * 100.0
}

pub fn miss_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    misses as f64 / total as f64 * 100.0
}

/// Point-in-time statistics for one tier, or several tiers combined.
///
/// `hit_rate` and `miss_rate` are derived from `hits`/`misses` when the
/// snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub total_size_bytes: usize,
    pub entry_count: usize,
    pub capacity_bytes: usize,
    pub default_ttl_seconds: u64,
    pub avg_response_time_ms: f64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Usage as a fraction of capacity (0.0 - 1.0).
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.total_size_bytes as f64 / self.capacity_bytes as f64
    }

    /// Combine snapshots of several tiers.
    ///
    /// The response time is weighted by each tier's lookups; `default_ttl_seconds`
    /// has no meaning across tiers and is left at zero.
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> CacheStats {
        let mut total = CacheStats::default();
        let mut weighted_ms = 0.0;
        for s in stats {
            total.hits += s.hits;
            total.misses += s.misses;
            total.sets += s.sets;
            total.deletes += s.deletes;
            total.evictions += s.evictions;
            total.expirations += s.expirations;
            total.promotions += s.promotions;
            total.total_size_bytes += s.total_size_bytes;
            total.entry_count += s.entry_count;
            total.capacity_bytes += s.capacity_bytes;
            weighted_ms += s.avg_response_time_ms * s.lookups() as f64;
        }
        if total.lookups() > 0 {
            total.avg_response_time_ms = weighted_ms / total.lookups() as f64;
        }
        total.hit_rate = hit_rate(total.hits, total.misses);
        total.miss_rate = miss_rate(total.hits, total.misses);
        total
    }
}
