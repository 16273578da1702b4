//! Prometheus export of per-tier cache statistics.
//!
//! Counters already live in each tier; this module mirrors them into gauges
//! labelled by tier so any prometheus scraper can read them.
//!
//! # Metric Naming Convention
//! - `tiered_cache_` prefix for all metrics
//! - `_total` suffix for monotonically growing counts
//! - `_bytes` suffix for sizes

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::facade::Cache;

pub struct CacheMetrics {
    registry: Registry,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    sets: IntGaugeVec,
    deletes: IntGaugeVec,
    evictions: IntGaugeVec,
    expirations: IntGaugeVec,
    promotions: IntGaugeVec,
    size_bytes: IntGaugeVec,
    capacity_bytes: IntGaugeVec,
    entries: IntGaugeVec,
    default_ttl_seconds: IntGaugeVec,
    hit_rate: GaugeVec,
    avg_response_ms: GaugeVec,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn float_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl CacheMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            hits: int_gauge(&registry, "tiered_cache_hits_total", "Lookups served by the tier")?,
            misses: int_gauge(&registry, "tiered_cache_misses_total", "Lookups the tier could not serve")?,
            sets: int_gauge(&registry, "tiered_cache_sets_total", "Entries written")?,
            deletes: int_gauge(&registry, "tiered_cache_deletes_total", "Entries deleted or invalidated")?,
            evictions: int_gauge(&registry, "tiered_cache_evictions_total", "Entries evicted for space")?,
            expirations: int_gauge(&registry, "tiered_cache_expirations_total", "Entries dropped after their TTL")?,
            promotions: int_gauge(&registry, "tiered_cache_promotions_total", "Entries copied in from slower tiers")?,
            size_bytes: int_gauge(&registry, "tiered_cache_size_bytes", "Bytes currently stored")?,
            capacity_bytes: int_gauge(&registry, "tiered_cache_capacity_bytes", "Configured capacity")?,
            entries: int_gauge(&registry, "tiered_cache_entries", "Entries currently stored")?,
            default_ttl_seconds: int_gauge(&registry, "tiered_cache_default_ttl_seconds", "Current default TTL")?,
            hit_rate: float_gauge(&registry, "tiered_cache_hit_rate_percent", "Hits as a percentage of lookups")?,
            avg_response_ms: float_gauge(&registry, "tiered_cache_avg_response_ms", "Mean lookup time")?,
            registry,
        })
    }

    /// Copy the current statistics of every tier into the gauges.
    pub fn update(&self, cache: &Cache) {
        for (tier, stats) in cache.all_stats() {
            let labels: &[&str] = &[tier.as_str()];
            self.hits.with_label_values(labels).set(stats.hits as i64);
            self.misses.with_label_values(labels).set(stats.misses as i64);
            self.sets.with_label_values(labels).set(stats.sets as i64);
            self.deletes.with_label_values(labels).set(stats.deletes as i64);
            self.evictions.with_label_values(labels).set(stats.evictions as i64);
            self.expirations.with_label_values(labels).set(stats.expirations as i64);
            self.promotions.with_label_values(labels).set(stats.promotions as i64);
            self.size_bytes.with_label_values(labels).set(stats.total_size_bytes as i64);
            self.capacity_bytes.with_label_values(labels).set(stats.capacity_bytes as i64);
            self.entries.with_label_values(labels).set(stats.entry_count as i64);
            self.default_ttl_seconds
                .with_label_values(labels)
                .set(stats.default_ttl_seconds as i64);
            self.hit_rate.with_label_values(labels).set(stats.hit_rate);
            self.avg_response_ms
                .with_label_values(labels)
                .set(stats.avg_response_time_ms);
        }
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
