//! tiered-cache: a multi-tier cache engine.
//!
//! Values are stored across a hierarchy of prioritized tiers, fastest first:
//!   L1 (small, hot) → L2 (larger, compressed) → L3 (largest, durable)
//!
//! Each tier has its own capacity, eviction policy (LRU, LFU, FIFO, TTL) and
//! default TTL. Reads walk the tiers in priority order and promote hot
//! entries into faster tiers; writes go through to every target tier.
//! Entries can be invalidated in bulk by key pattern or tag, and a background
//! maintenance task sweeps expired entries, runs time-triggered rules and
//! retunes each tier's TTL from its hit rate.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod maintenance;
pub mod metrics;
pub mod service;

pub use cache::facade::{Cache, CacheBuilder, GetOptions, InvalidateOptions, SetOptions, WarmEntry};
pub use cache::stats::CacheStats;
pub use config::Config;
pub use error::{CacheError, Result};
pub use service::CacheService;
