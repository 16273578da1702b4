//! Tiered cache storage.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: Entry type and freshness states
//! - [`tier`]: A single locked storage tier
//! - [`registry`]: Tiers ordered fastest first
//! - [`evictor`]: Eviction policies (LRU, LFU, FIFO, TTL)
//! - [`facade`]: The public get/set/invalidate API with promotion
//! - [`serializer`] / [`compressor`]: Pluggable value encoding
//! - [`refresh`]: Background refresh hook for stale entries
//! - [`stats`]: Counters and derived rates

pub mod compressor;
pub mod entry;
pub mod evictor;
pub mod facade;
pub mod refresh;
pub mod registry;
pub mod serializer;
pub mod stats;
pub mod tier;
