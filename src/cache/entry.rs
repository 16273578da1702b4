//! Cache entry type and its freshness states.
//!
//! An entry is the unit of storage inside a tier. It carries the encoded
//! (and possibly compressed) value together with access metadata used by the
//! eviction policies and the maintenance sweep.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use serde::Serialize;

/// Freshness of an entry relative to its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    /// age < ttl * stale_factor
    Fresh,
    /// ttl * stale_factor <= age < ttl; still served, eligible for refresh.
    Stale,
    /// age >= ttl; never served again.
    Expired,
}

/// A single cached value.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,

    /// Encoded value, compressed when `compressed` is set.
    pub value: Bytes,

    /// Insertion time (ms since epoch).
    pub stored_at: u64,

    pub ttl_seconds: u64,

    pub access_count: u64,

    /// Last read time (ms since epoch).
    pub last_accessed_at: u64,

    /// Always `value.len()`.
    pub size_bytes: usize,

    pub compressed: bool,

    pub tags: BTreeSet<String>,

    pub metadata: HashMap<String, serde_json::Value>,

    /// Tier-local insertion order, used to break eviction ties. Also tells a
    /// rewritten entry apart from the one it replaced.
    pub(crate) sequence: u64,
}

impl Entry {
    /// Create an entry stored at `now_ms`.
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        compressed: bool,
        ttl_seconds: u64,
        now_ms: u64,
    ) -> Self {
        let size_bytes = value.len();
        Self {
            key: key.into(),
            value: Bytes::from(value),
            stored_at: now_ms,
            ttl_seconds,
            access_count: 0,
            last_accessed_at: now_ms,
            size_bytes,
            compressed,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record a read.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_accessed_at = now_ms;
        self.access_count += 1;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.stored_at)
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_seconds.saturating_mul(1000)
    }

    /// Absolute expiry time (ms since epoch).
    pub fn expires_at(&self) -> u64 {
        self.stored_at.saturating_add(self.ttl_ms())
    }

    pub fn state(&self, now_ms: u64, stale_factor: f64) -> EntryState {
        let age = self.age_ms(now_ms);
        let ttl = self.ttl_ms();
        if age >= ttl {
            EntryState::Expired
        } else if age as f64 >= ttl as f64 * stale_factor {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms) >= self.ttl_ms()
    }

    /// Whether any of `tags` is attached to this entry.
    pub fn has_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.tags.contains(t.as_ref()))
    }
}
