//! Ordered collection of tiers, fastest first.
//!
//! Built once at construction and never mutated afterwards, so iteration
//! needs no lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::tier::Tier;
use crate::error::CacheError;

#[derive(Debug)]
pub struct TierRegistry {
    tiers: Vec<Arc<Tier>>,
    by_name: HashMap<String, usize>,
}

impl TierRegistry {
    /// Order tiers by ascending priority; equal priorities keep their given order.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self, CacheError> {
        if tiers.is_empty() {
            return Err(CacheError::Configuration("at least one tier is required".into()));
        }
        tiers.sort_by_key(|t| t.priority());

        let mut by_name = HashMap::with_capacity(tiers.len());
        for (idx, tier) in tiers.iter().enumerate() {
            if by_name.insert(tier.name().to_string(), idx).is_some() {
                return Err(CacheError::Configuration(format!(
                    "duplicate tier name {}",
                    tier.name()
                )));
            }
        }

        Ok(Self {
            tiers: tiers.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    pub fn tiers_ordered_by_priority(&self) -> &[Arc<Tier>] {
        &self.tiers
    }

    pub fn tier(&self, name: &str) -> Option<&Arc<Tier>> {
        self.by_name.get(name).map(|&idx| &self.tiers[idx])
    }

    /// Position of the named tier in priority order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}
