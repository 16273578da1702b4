//! Error taxonomy for the cache engine.
//!
//! Data-path failures (serialization, compression, eviction) are scoped to a
//! single tier and reported through [`SetOutcome`](crate::cache::facade::SetOutcome)
//! or logged on the read path. Only configuration, unknown-tier and pattern
//! errors reach callers as `Err`.

use thiserror::Error;

use crate::cache::compressor::CompressionError;
use crate::cache::serializer::SerializationError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Compression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("Tier {tier} cannot free {needed} bytes (capacity {capacity})")]
    EvictionExhausted {
        tier: String,
        needed: usize,
        capacity: usize,
    },

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Invalidation rule {0} is already registered")]
    DuplicateRule(String),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
