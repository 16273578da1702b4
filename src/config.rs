//! Runtime configuration for tiered-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Tier definitions, promotion knobs, maintenance/adaptive tuning and
//! statically declared invalidation rules all live here.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::cache::evictor::EvictionPolicy;
use crate::cache::serializer::SerializationFormat;
use crate::error::CacheError;
use crate::invalidation::rule::{RuleAction, Trigger};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiered-cache", about = "Multi-tier cache engine")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the maintenance interval in seconds.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Number of synthetic entries to preload.
    #[arg(long, default_value_t = 100)]
    pub warm: usize,

    /// Number of maintenance ticks to run before exiting.
    #[arg(long, default_value_t = 3)]
    pub ticks: u32,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tier definitions, in any order (they are sorted by priority).
    pub tiers: Vec<TierConfig>,

    /// Cross-tier promotion and staleness settings.
    pub promotion: PromotionConfig,

    /// Background maintenance settings.
    pub maintenance: MaintenanceConfig,

    /// Compression settings.
    pub compression: CompressionConfig,

    /// Invalidation rules registered at startup.
    pub invalidation_rules: Vec<RuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig {
                    eviction_policy: EvictionPolicy::Lru,
                    default_ttl_seconds: 300,
                    ..TierConfig::new("L1", 0, 64 * 1024 * 1024) // 64 MB
                },
                TierConfig {
                    eviction_policy: EvictionPolicy::Lfu,
                    default_ttl_seconds: 3600,
                    compression_enabled: true,
                    ..TierConfig::new("L2", 1, 256 * 1024 * 1024) // 256 MB
                },
                TierConfig {
                    eviction_policy: EvictionPolicy::Ttl,
                    default_ttl_seconds: 86_400,
                    compression_enabled: true,
                    durable: true,
                    replicated: true,
                    ..TierConfig::new("L3", 2, 1024 * 1024 * 1024) // 1 GB
                },
            ],
            promotion: PromotionConfig::default(),
            maintenance: MaintenanceConfig::default(),
            compression: CompressionConfig::default(),
            invalidation_rules: Vec::new(),
        }
    }
}

/// A single storage tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Unique tier name (e.g. "L1").
    pub name: String,

    /// Lower = faster, checked first.
    pub priority: u32,

    /// Maximum bytes stored in this tier.
    pub capacity_bytes: usize,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// TTL applied when `set` does not supply one.
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,

    #[serde(default)]
    pub compression_enabled: bool,

    #[serde(default)]
    pub serialization_format: SerializationFormat,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub replicated: bool,
}

fn default_ttl_seconds() -> u64 {
    300
}

impl TierConfig {
    /// An LRU, uncompressed, JSON tier with a five minute default TTL.
    pub fn new(name: impl Into<String>, priority: u32, capacity_bytes: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            capacity_bytes,
            eviction_policy: EvictionPolicy::default(),
            default_ttl_seconds: default_ttl_seconds(),
            compression_enabled: false,
            serialization_format: SerializationFormat::default(),
            durable: false,
            replicated: false,
        }
    }
}

/// Promotion and staleness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Entries read more than this many times are copied into faster tiers.
    pub threshold: u64,

    /// Fraction of TTL after which an entry is stale (still served, eligible for refresh).
    pub stale_factor: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            stale_factor: 0.8,
        }
    }
}

/// Background maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between maintenance ticks.
    pub interval_secs: u64,

    /// Start the maintenance task as part of `CacheService::init`.
    pub auto_start: bool,

    /// Hit-rate driven TTL tuning.
    pub adaptive: AdaptiveConfig,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            auto_start: false,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// Adaptive tuning thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Hit rate (percent) below which the default TTL grows.
    pub low_hit_rate: f64,

    /// Hit rate (percent) above which the default TTL shrinks.
    pub high_hit_rate: f64,

    /// Relative TTL change per tick.
    pub ttl_step: f64,

    /// Floor for the default TTL.
    pub min_ttl_seconds: u64,

    /// Ceiling for the default TTL.
    pub max_ttl_seconds: u64,

    /// Usage fraction above which a tier is proactively trimmed.
    pub pressure_threshold: f64,

    /// Fraction of capacity freed by a proactive trim.
    pub proactive_evict_fraction: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            low_hit_rate: 70.0,
            high_hit_rate: 95.0,
            ttl_step: 0.10,
            min_ttl_seconds: 30,
            max_ttl_seconds: 7 * 86_400, // one week
            pressure_threshold: 0.90,
            proactive_evict_fraction: 0.10,
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { zstd_level: 3 }
    }
}

/// An invalidation rule declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Key pattern (regex, or glob when `glob` is set).
    pub pattern: String,

    #[serde(default)]
    pub glob: bool,

    pub trigger: Trigger,

    #[serde(default)]
    pub action: RuleAction,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.tiers.is_empty() {
            return Err(CacheError::Configuration("at least one tier is required".into()));
        }

        if self.maintenance.interval_secs == 0 {
            return Err(CacheError::Configuration("maintenance interval must be positive".into()));
        }

        let adaptive = &self.maintenance.adaptive;
        if adaptive.min_ttl_seconds > adaptive.max_ttl_seconds {
            return Err(CacheError::Configuration(format!(
                "min_ttl_seconds ({}) exceeds max_ttl_seconds ({})",
                adaptive.min_ttl_seconds, adaptive.max_ttl_seconds
            )));
        }
        if !(0.0..=100.0).contains(&adaptive.low_hit_rate)
            || !(0.0..=100.0).contains(&adaptive.high_hit_rate)
            || adaptive.low_hit_rate > adaptive.high_hit_rate
        {
            return Err(CacheError::Configuration(
                "hit rate thresholds must satisfy 0 <= low <= high <= 100".into(),
            ));
        }
        if !(adaptive.ttl_step > 0.0 && adaptive.ttl_step < 1.0) {
            return Err(CacheError::Configuration("ttl_step must be in (0, 1)".into()));
        }
        if !(adaptive.pressure_threshold > 0.0 && adaptive.pressure_threshold <= 1.0)
            || !(adaptive.proactive_evict_fraction > 0.0 && adaptive.proactive_evict_fraction <= 1.0)
        {
            return Err(CacheError::Configuration(
                "pressure_threshold and proactive_evict_fraction must be in (0, 1]".into(),
            ));
        }
        if !(self.promotion.stale_factor > 0.0 && self.promotion.stale_factor <= 1.0) {
            return Err(CacheError::Configuration("stale_factor must be in (0, 1]".into()));
        }
        if !(1..=22).contains(&self.compression.zstd_level) {
            return Err(CacheError::Configuration(format!(
                "zstd_level {} is outside 1..=22",
                self.compression.zstd_level
            )));
        }

        let mut names = HashSet::new();
        for tier in &self.tiers {
            if !names.insert(tier.name.as_str()) {
                return Err(CacheError::Configuration(format!(
                    "duplicate tier name {}",
                    tier.name
                )));
            }
            if tier.capacity_bytes == 0 {
                return Err(CacheError::Configuration(format!(
                    "tier {} has zero capacity",
                    tier.name
                )));
            }
            if tier.default_ttl_seconds == 0 {
                return Err(CacheError::Configuration(format!(
                    "tier {} has zero default TTL",
                    tier.name
                )));
            }
            if tier.default_ttl_seconds < adaptive.min_ttl_seconds
                || tier.default_ttl_seconds > adaptive.max_ttl_seconds
            {
                return Err(CacheError::Configuration(format!(
                    "tier {} default TTL {}s is outside [{}, {}]",
                    tier.name,
                    tier.default_ttl_seconds,
                    adaptive.min_ttl_seconds,
                    adaptive.max_ttl_seconds
                )));
            }
        }

        Ok(())
    }
}
