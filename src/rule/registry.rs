//! Trigger-indexed rule storage.
//!
//! Candidates for a stimulus are returned sorted by `(priority desc,
//! insertion order asc)`, per spec §4.8: higher-priority rules run first;
//! ties break by registration order.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::DispatchError;
use crate::event_bus::topic_matches;
use crate::glob::segment_glob_match;

use super::{Rule, Trigger};

struct Entry {
    rule: Rule,
    seq: u64,
}

/// Rules indexed by id, with ordering (priority, insertion) computed lazily
/// at candidate-selection time rather than maintained incrementally —
/// registration is far rarer than dispatch, so this favors simplicity.
#[derive(Default)]
pub struct RuleRegistry {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl RuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Registers `rule`, assigning `version = 1` and `created_at`/
    /// `updated_at` timestamps. Fails if a rule with the same id already
    /// exists — callers must `unregister` first to replace one (spec
    /// §4.4).
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::DuplicateRuleId` if `rule.id` is already
    /// registered.
    pub fn register(&mut self, mut rule: Rule) -> Result<(), DispatchError> {
        if self.entries.contains_key(&rule.id) {
            return Err(DispatchError::DuplicateRuleId(rule.id));
        }
        let now = Utc::now();
        rule.version = 1;
        rule.created_at = now;
        rule.updated_at = now;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(rule.id.clone(), Entry { rule, seq });
        Ok(())
    }

    /// Removes a rule. Returns `true` if it was present.
    pub fn unregister(&mut self, rule_id: &str) -> bool {
        self.entries.remove(rule_id).is_some()
    }

    pub fn enable(&mut self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, true)
    }

    pub fn disable(&mut self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, false)
    }

    /// Bumps `version` and `updated_at` the way every in-process mutation
    /// must, per §3's "monotonic `version` … incremented on any in-process
    /// mutation".
    fn touch(entry: &mut Entry) {
        entry.rule.version += 1;
        entry.rule.updated_at = Utc::now();
    }

    fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        match self.entries.get_mut(rule_id) {
            Some(entry) => {
                if entry.rule.enabled != enabled {
                    entry.rule.enabled = enabled;
                    Self::touch(entry);
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.entries.get(rule_id).map(|e| &e.rule)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered rule, sorted by `(priority desc, insertion asc)`,
    /// regardless of trigger kind or enabled state.
    #[must_use]
    pub fn all(&self) -> Vec<&Rule> {
        let mut out: Vec<(&Rule, u64)> = self.entries.values().map(|e| (&e.rule, e.seq)).collect();
        out.sort_by(|a, b| b.0.priority.cmp(&a.0.priority).then(a.1.cmp(&b.1)));
        out.into_iter().map(|(rule, _)| rule).collect()
    }

    /// Rules with an `Event` trigger whose pattern matches `topic`, enabled,
    /// sorted by `(priority desc, insertion asc)`.
    #[must_use]
    pub fn candidates_for_event(&self, topic: &str) -> Vec<&Rule> {
        self.candidates(|rule| match &rule.trigger {
            Trigger::Event { pattern } => topic_matches(pattern, topic),
            _ => false,
        })
    }

    /// Rules with a `Fact` trigger whose pattern matches `key`.
    #[must_use]
    pub fn candidates_for_fact(&self, key: &str) -> Vec<&Rule> {
        self.candidates(|rule| match &rule.trigger {
            Trigger::Fact { pattern } => segment_glob_match(pattern, key, ':'),
            _ => false,
        })
    }

    /// Rules with a `Timer` trigger whose pattern matches `timer_name`.
    #[must_use]
    pub fn candidates_for_timer(&self, timer_name: &str) -> Vec<&Rule> {
        self.candidates(|rule| match &rule.trigger {
            Trigger::Timer { pattern } => segment_glob_match(pattern, timer_name, ':'),
            _ => false,
        })
    }

    /// Rules with a `Temporal` trigger naming `detector_id`, where
    /// `detector_id` is `"{rule_id}:{name}"` (temporal detectors are scoped
    /// to the rule that declares them, spec §4.6).
    #[must_use]
    pub fn candidates_for_temporal(&self, detector_id: &str) -> Vec<&Rule> {
        self.candidates(|rule| match &rule.trigger {
            Trigger::Temporal { detector_id: id } => id == detector_id,
            _ => false,
        })
    }

    fn candidates(&self, matches: impl Fn(&Rule) -> bool) -> Vec<&Rule> {
        let mut out: Vec<(&Rule, u64)> = self
            .entries
            .values()
            .filter(|e| e.rule.enabled && matches(&e.rule))
            .map(|e| (&e.rule, e.seq))
            .collect();
        out.sort_by(|a, b| b.0.priority.cmp(&a.0.priority).then(a.1.cmp(&b.1)));
        out.into_iter().map(|(rule, _)| rule).collect()
    }
}

/// Computes the scoped temporal detector id `"{rule_id}:{name}"` used by
/// `Trigger::Temporal` and the temporal detector state tables.
#[must_use]
pub fn temporal_detector_id(rule_id: &str, name: &str) -> String {
    format!("{rule_id}:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Action;

    fn rule(id: &str, pattern: &str, priority: i32) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            trigger: Trigger::Event { pattern: pattern.to_string() },
            temporal: Default::default(),
            conditions: Vec::new(),
            actions: vec![Action::Emit {
                topic: "noop".to_string(),
                data: crate::value::Value::Null,
            }],
            priority,
            enabled: true,
            tags: Vec::new(),
            group: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        assert!(reg.get("r1").is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_duplicate_id_fails() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        let err = reg.register(rule("r1", "payment.*", 0)).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateRuleId(id) if id == "r1"));
    }

    #[test]
    fn test_unregister() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        assert!(reg.unregister("r1"));
        assert!(!reg.unregister("r1"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_disable_excludes_from_candidates() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        reg.disable("r1");
        assert!(reg.candidates_for_event("order.created").is_empty());
        reg.enable("r1");
        assert_eq!(reg.candidates_for_event("order.created").len(), 1);
    }

    #[test]
    fn test_candidates_sorted_by_priority_then_insertion() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("low", "order.*", 0)).unwrap();
        reg.register(rule("high", "order.*", 10)).unwrap();
        reg.register(rule("also-low", "order.*", 0)).unwrap();

        let ids: Vec<&str> = reg
            .candidates_for_event("order.created")
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["high", "low", "also-low"]);
    }

    #[test]
    fn test_candidates_for_fact_pattern() {
        let mut reg = RuleRegistry::new();
        let mut r = rule("r1", "unused", 0);
        r.trigger = Trigger::Fact { pattern: "order:*:status".to_string() };
        reg.register(r).unwrap();

        assert_eq!(reg.candidates_for_fact("order:ord-1:status").len(), 1);
        assert!(reg.candidates_for_fact("order:ord-1:amount").is_empty());
    }

    #[test]
    fn test_register_assigns_version_one() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        assert_eq!(reg.get("r1").unwrap().version, 1);
    }

    #[test]
    fn test_disable_bumps_version() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        reg.disable("r1");
        assert_eq!(reg.get("r1").unwrap().version, 2);
        // Disabling an already-disabled rule is not a mutation.
        reg.disable("r1");
        assert_eq!(reg.get("r1").unwrap().version, 2);
    }

    #[test]
    fn test_temporal_detector_id_is_scoped() {
        assert_eq!(temporal_detector_id("r1", "burst"), "r1:burst");
    }

    #[test]
    fn test_all_includes_every_trigger_kind() {
        let mut reg = RuleRegistry::new();
        reg.register(rule("r1", "order.*", 0)).unwrap();
        let mut r2 = rule("r2", "unused", 5);
        r2.trigger = Trigger::Fact { pattern: "order:*:status".to_string() };
        reg.register(r2).unwrap();

        let ids: Vec<&str> = reg.all().into_iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }
}
