//! Eviction policy: decides which entries leave a tier when it runs out of room.
//!
//! Each policy is a total order over entries; victims are taken from the
//! front of that order until enough bytes are freed. Equal keys fall back to
//! insertion order so eviction is deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::entry::Entry;
use crate::cache::tier::TierState;

/// Victim selection order of a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicy {
    /// Least recently accessed first.
    #[default]
    Lru,
    /// Least frequently accessed first.
    Lfu,
    /// Oldest inserted first.
    Fifo,
    /// Soonest to expire first.
    Ttl,
}

/// Comparator placing the best eviction victim first.
pub type EntryOrdering = fn(&Entry, &Entry) -> Ordering;

impl EvictionPolicy {
    pub fn ordering(self) -> EntryOrdering {
        match self {
            EvictionPolicy::Lru => by_last_access,
            EvictionPolicy::Lfu => by_access_count,
            EvictionPolicy::Fifo => by_stored_at,
            EvictionPolicy::Ttl => by_expiry,
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "LRU"),
            EvictionPolicy::Lfu => write!(f, "LFU"),
            EvictionPolicy::Fifo => write!(f, "FIFO"),
            EvictionPolicy::Ttl => write!(f, "TTL"),
        }
    }
}

fn by_last_access(a: &Entry, b: &Entry) -> Ordering {
    a.last_accessed_at.cmp(&b.last_accessed_at)
}

fn by_access_count(a: &Entry, b: &Entry) -> Ordering {
    a.access_count.cmp(&b.access_count)
}

fn by_stored_at(a: &Entry, b: &Entry) -> Ordering {
    a.stored_at.cmp(&b.stored_at)
}

fn by_expiry(a: &Entry, b: &Entry) -> Ordering {
    a.expires_at().cmp(&b.expires_at())
}

/// An entry chosen for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: String,
    pub size_bytes: usize,
}

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub evicted: usize,
    pub freed_bytes: usize,
}

/// The eviction policy engine for one tier.
#[derive(Debug, Clone, Copy)]
pub struct Evictor {
    policy: EvictionPolicy,
    ordering: EntryOrdering,
}

impl Evictor {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            ordering: policy.ordering(),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Select the shortest prefix of the policy order whose sizes add up to
    /// at least `bytes_to_free`, or every entry if they do not.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = &'a Entry>,
        bytes_to_free: usize,
    ) -> Vec<EvictionCandidate> {
        if bytes_to_free == 0 {
            return Vec::new();
        }

        let mut ordered: Vec<&Entry> = entries.collect();
        let ordering = self.ordering;
        ordered.sort_by(|a, b| ordering(*a, *b).then(a.sequence.cmp(&b.sequence)));

        let mut freed = 0;
        let mut victims = Vec::new();
        for entry in ordered {
            if freed >= bytes_to_free {
                break;
            }
            freed += entry.size_bytes;
            victims.push(EvictionCandidate {
                key: entry.key.clone(),
                size_bytes: entry.size_bytes,
            });
        }
        victims
    }

    /// Remove victims from a locked tier until `bytes_to_free` bytes are freed
    /// or the tier is empty.
    pub fn evict(&self, tier: &str, state: &mut TierState, bytes_to_free: usize) -> EvictionOutcome {
        let victims = self.select_victims(state.entries.values(), bytes_to_free);

        let mut outcome = EvictionOutcome::default();
        for victim in victims {
            if let Some(entry) = state.entries.remove(&victim.key) {
                state.counters.remove_entry(entry.size_bytes);
                state.counters.evictions += 1;
                outcome.evicted += 1;
                outcome.freed_bytes += entry.size_bytes;
                debug!(
                    tier,
                    key = %entry.key,
                    size = entry.size_bytes,
                    policy = %self.policy,
                    "Evicted entry"
                );
            }
        }
        outcome
    }
}
