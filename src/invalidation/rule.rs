//! Invalidation rule definitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::entry::Entry;
use crate::config::RuleConfig;
use crate::error::CacheError;
use crate::invalidation::pattern::Pattern;

/// What causes a rule to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Every maintenance tick.
    Time,
    /// An external event, e.g. a record update.
    Event,
    /// A dependency of the cached data changed.
    Dependency,
    /// Only when applied explicitly.
    Manual,
}

/// What a rule does to the entries it matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Delete,
    /// Ask the refresh hook for new values; entries stay in place meanwhile.
    Refresh,
    /// Attach the given tag.
    Tag(String),
}

/// Extra filter applied after the key pattern.
pub type EntryPredicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct InvalidationRule {
    pub id: String,
    pub pattern: Pattern,
    pub trigger: Trigger,
    pub predicate: Option<EntryPredicate>,
    pub action: RuleAction,
    pub enabled: bool,
}

impl std::fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("trigger", &self.trigger)
            .field("has_predicate", &self.predicate.is_some())
            .field("action", &self.action)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl InvalidationRule {
    /// A delete rule over keys matching the regex `pattern`, with a generated id.
    pub fn new(pattern: &str, trigger: Trigger) -> Result<Self, CacheError> {
        Ok(Self::with_pattern(Pattern::new(pattern)?, trigger))
    }

    /// Like [`InvalidationRule::new`], with a glob pattern.
    pub fn glob(glob: &str, trigger: Trigger) -> Result<Self, CacheError> {
        Ok(Self::with_pattern(Pattern::glob(glob)?, trigger))
    }

    fn with_pattern(pattern: Pattern, trigger: Trigger) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern,
            trigger,
            predicate: None,
            action: RuleAction::Delete,
            enabled: true,
        }
    }

    pub fn from_config(config: &RuleConfig) -> Result<Self, CacheError> {
        let mut rule = if config.glob {
            Self::glob(&config.pattern, config.trigger)?
        } else {
            Self::new(&config.pattern, config.trigger)?
        };
        if let Some(id) = &config.id {
            rule.id = id.clone();
        }
        rule.action = config.action.clone();
        rule.enabled = config.enabled;
        Ok(rule)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    /// Narrow the rule to entries that also satisfy `predicate`. It runs on a
    /// copy of each entry with no tier lock held, so it may read the cache.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entry) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.pattern.is_match(&entry.key) && self.predicate.as_ref().map_or(true, |p| p(entry))
    }
}
