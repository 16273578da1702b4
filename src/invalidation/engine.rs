//! The rule set and its dispatch.
//!
//! Rules live behind their own lock. Dispatch clones the rules it needs and
//! releases that lock before touching any tier.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::facade::Cache;
use crate::error::CacheError;
use crate::invalidation::rule::{InvalidationRule, RuleAction, Trigger};

pub struct InvalidationEngine {
    cache: Cache,
    rules: RwLock<Vec<InvalidationRule>>,
}

impl InvalidationEngine {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn with_rules(
        cache: Cache,
        rules: impl IntoIterator<Item = InvalidationRule>,
    ) -> Result<Self, CacheError> {
        let engine = Self::new(cache);
        for rule in rules {
            engine.register(rule)?;
        }
        Ok(engine)
    }

    /// Add a rule. Ids must be unique.
    pub fn register(&self, rule: InvalidationRule) -> Result<(), CacheError> {
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(CacheError::DuplicateRule(rule.id));
        }
        debug!(
            rule = %rule.id,
            pattern = rule.pattern.as_str(),
            trigger = ?rule.trigger,
            "Registered invalidation rule"
        );
        rules.push(rule);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.rules.write().iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<InvalidationRule> {
        self.rules.read().clone()
    }

    /// Run every enabled time-triggered rule. Returns the entries affected.
    pub fn apply_time_triggered_rules(&self) -> usize {
        self.fire(Trigger::Time)
    }

    /// Run every enabled rule with the given trigger. Returns the entries affected.
    pub fn fire(&self, trigger: Trigger) -> usize {
        let selected: Vec<InvalidationRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled && r.trigger == trigger)
            .cloned()
            .collect();

        selected.iter().map(|rule| self.run(rule)).sum()
    }

    /// Run one rule now, whatever its trigger. `None` if the id is unknown;
    /// disabled rules affect nothing.
    pub fn apply_rule(&self, id: &str) -> Option<usize> {
        let rule = self.rules.read().iter().find(|r| r.id == id).cloned()?;
        if !rule.enabled {
            return Some(0);
        }
        Some(self.run(&rule))
    }

    fn run(&self, rule: &InvalidationRule) -> usize {
        let affected = match &rule.action {
            RuleAction::Delete => self.cache.remove_where(|e| rule.matches(e)),
            RuleAction::Refresh => self.cache.refresh_where(|e| rule.matches(e)),
            RuleAction::Tag(tag) => self.cache.tag_where(tag, |e| rule.matches(e)),
        };
        if affected > 0 {
            info!(
                rule = %rule.id,
                action = ?rule.action,
                affected,
                "Applied invalidation rule"
            );
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::facade::SetOptions;
    use crate::config::Config;

    fn engine() -> InvalidationEngine {
        InvalidationEngine::new(Cache::new(Config::default()).unwrap())
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let engine = engine();
        let rule = InvalidationRule::new("a", Trigger::Time).unwrap().with_id("r1");
        engine.register(rule.clone()).unwrap();
        assert!(matches!(engine.register(rule), Err(CacheError::DuplicateRule(_))));
        assert!(engine.unregister("r1"));
        assert!(!engine.unregister("r1"));
    }

    #[test]
    fn test_only_matching_trigger_runs() {
        let engine = engine();
        engine.cache.set("session:1", "x", &SetOptions::default());
        engine.cache.set("user:1", "y", &SetOptions::default());

        engine
            .register(InvalidationRule::glob("user:*", Trigger::Event).unwrap())
            .unwrap();
        engine
            .register(InvalidationRule::glob("session:*", Trigger::Time).unwrap())
            .unwrap();

        // Three tiers hold each key.
        assert_eq!(engine.apply_time_triggered_rules(), 3);
        assert!(!engine.cache.contains("session:1"));
        assert!(engine.cache.contains("user:1"));

        assert_eq!(engine.fire(Trigger::Event), 3);
        assert!(!engine.cache.contains("user:1"));
    }

    #[test]
    fn test_disabled_rules_do_nothing() {
        let engine = engine();
        engine.cache.set("k", "v", &SetOptions::default());
        engine
            .register(
                InvalidationRule::new("k", Trigger::Time)
                    .unwrap()
                    .with_id("off")
                    .disabled(),
            )
            .unwrap();

        assert_eq!(engine.apply_time_triggered_rules(), 0);
        assert_eq!(engine.apply_rule("off"), Some(0));
        assert_eq!(engine.apply_rule("missing"), None);

        assert!(engine.set_enabled("off", true));
        assert_eq!(engine.apply_rule("off"), Some(3));
    }

    #[test]
    fn test_tag_action() {
        let engine = engine();
        engine.cache.set("report:1", "r", &SetOptions::default().tiers(["L1"]));
        engine
            .register(
                InvalidationRule::new("^report:", Trigger::Manual)
                    .unwrap()
                    .with_id("mark")
                    .with_action(RuleAction::Tag("stale".into())),
            )
            .unwrap();

        assert_eq!(engine.apply_rule("mark"), Some(1));
        let entry = engine.cache.registry().tier("L1").unwrap().peek("report:1").unwrap();
        assert!(entry.tags.contains("stale"));
    }
}
