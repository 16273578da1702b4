//! Periodic background maintenance.
//!
//! Each tick, in order:
//! 1. drops expired entries from every tier, so staleness stays bounded even
//!    for keys nobody reads;
//! 2. runs the time-triggered invalidation rules;
//! 3. retunes every tier: the default TTL grows when the hit rate is low and
//!    shrinks when it is very high (clamped to the configured bounds), and a
//!    tier above its pressure threshold is proactively trimmed.
//!
//! Tiers are handled independently; nothing in one tier's pass can stop the
//! others.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::facade::Cache;
use crate::cache::tier::Tier;
use crate::config::AdaptiveConfig;
use crate::invalidation::engine::InvalidationEngine;

/// A default TTL change made by the adaptive pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtlAdjustment {
    pub tier: String,
    pub hit_rate: f64,
    pub from_seconds: u64,
    pub to_seconds: u64,
}

/// What one maintenance tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub expired: usize,
    pub invalidated: usize,
    pub adjustments: Vec<TtlAdjustment>,
    pub proactively_evicted: usize,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.expired == 0
            && self.invalidated == 0
            && self.adjustments.is_empty()
            && self.proactively_evicted == 0
    }
}

pub struct MaintenanceScheduler {
    cache: Cache,
    invalidation: Arc<InvalidationEngine>,
    adaptive: AdaptiveConfig,
}

impl MaintenanceScheduler {
    pub fn new(cache: Cache, invalidation: Arc<InvalidationEngine>, adaptive: AdaptiveConfig) -> Self {
        Self {
            cache,
            invalidation,
            adaptive,
        }
    }

    /// Run one maintenance pass synchronously.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.cache.now_ms();
        let tiers = self.cache.registry().tiers_ordered_by_priority();

        for tier in tiers {
            let expired = tier.sweep_expired(now);
            if expired > 0 {
                debug!(tier = %tier.name(), expired, "Swept expired entries");
            }
            report.expired += expired;
        }

        report.invalidated = self.invalidation.apply_time_triggered_rules();

        for tier in tiers {
            if let Some(adjustment) = self.retune_ttl(tier) {
                report.adjustments.push(adjustment);
            }
            report.proactively_evicted += self.relieve_pressure(tier);
        }

        if report.is_noop() {
            debug!("Maintenance tick: nothing to do");
        } else {
            info!(
                expired = report.expired,
                invalidated = report.invalidated,
                adjusted = report.adjustments.len(),
                evicted = report.proactively_evicted,
                "Maintenance tick complete"
            );
        }
        report
    }

    fn retune_ttl(&self, tier: &Tier) -> Option<TtlAdjustment> {
        let stats = tier.stats();
        if stats.lookups() == 0 {
            return None;
        }

        let cfg = &self.adaptive;
        let current = stats.default_ttl_seconds;
        let target = if stats.hit_rate < cfg.low_hit_rate {
            let grown = (current as f64 * (1.0 + cfg.ttl_step)).round() as u64;
            grown.max(current + 1).min(cfg.max_ttl_seconds)
        } else if stats.hit_rate > cfg.high_hit_rate {
            let shrunk = (current as f64 * (1.0 - cfg.ttl_step)).round() as u64;
            shrunk.min(current.saturating_sub(1)).max(cfg.min_ttl_seconds)
        } else {
            current
        };

        if target == current {
            return None;
        }
        tier.set_default_ttl_seconds(target);
        debug!(
            tier = %tier.name(),
            hit_rate = stats.hit_rate,
            from = current,
            to = target,
            "Adjusted default TTL"
        );
        Some(TtlAdjustment {
            tier: tier.name().to_string(),
            hit_rate: stats.hit_rate,
            from_seconds: current,
            to_seconds: target,
        })
    }

    fn relieve_pressure(&self, tier: &Tier) -> usize {
        let stats = tier.stats();
        let capacity = tier.capacity_bytes() as f64;
        if (stats.total_size_bytes as f64) <= capacity * self.adaptive.pressure_threshold {
            return 0;
        }
        let bytes = (capacity * self.adaptive.proactive_evict_fraction) as usize;
        let evicted = tier.evict(bytes);
        debug!(tier = %tier.name(), bytes, evicted, "Proactive eviction");
        evicted
    }

    /// Run [`MaintenanceScheduler::tick`] every `interval` on the tokio runtime
    /// until the returned handle is stopped. The first tick runs one interval
    /// after start.
    pub fn start(self: Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Maintenance started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // completes immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Maintenance stopped");
        });

        MaintenanceHandle { shutdown, task }
    }
}

/// Controls a running maintenance task.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task to stop and wait for it. A tick in progress completes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Maintenance task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
