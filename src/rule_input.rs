//! Ingest-time normalization and validation of a caller-supplied rule
//! definition, ahead of `RuleRegistry::register`.
//!
//! This is the in-crate tail of the (out-of-scope) rule-definition DSL
//! surface: callers hand in a loosely-defaulted `RuleInput`, and
//! `validate_rule_input` either returns a fully-populated `Rule` or every
//! structural problem found, collected rather than raised one at a time.

use serde::{Deserialize, Serialize};

use crate::duration::EngineDuration;
use crate::error::ValidationError;
use crate::rule::{Action, Condition, Rule, TemporalPattern, Trigger};

/// A caller-supplied rule definition prior to normalization. Optional
/// fields default the same way `RuleInput` does on the wire: `priority=0`,
/// `enabled=true`, `tags=[]`, `conditions=[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInput {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub temporal: std::collections::BTreeMap<String, TemporalPattern>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// Normalizes `input` and checks it structurally, collecting every issue
/// found rather than failing on the first.
///
/// # Errors
///
/// Returns every `ValidationError` found. An empty `Vec` never occurs on
/// the `Err` path — a non-empty `Err` always accompanies at least one
/// issue.
pub fn validate_rule_input(input: RuleInput) -> Result<Rule, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if input.id.trim().is_empty() {
        errors.push(ValidationError::new("id", "rule id must not be empty"));
    }
    if input.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "rule name must not be empty"));
    }
    if input.actions.is_empty() {
        errors.push(ValidationError::new("actions", "a rule must declare at least one action"));
    }

    check_trigger(&input.trigger, &input.temporal, &mut errors);
    for (name, pattern) in &input.temporal {
        check_temporal_pattern(name, pattern, &mut errors);
    }
    for (idx, action) in input.actions.iter().enumerate() {
        check_action(idx, action, &mut errors);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let now = chrono::Utc::now();
    Ok(Rule {
        id: input.id,
        name: input.name,
        description: input.description,
        trigger: input.trigger,
        temporal: input.temporal,
        conditions: input.conditions,
        actions: input.actions,
        priority: input.priority,
        enabled: input.enabled.unwrap_or(true),
        tags: input.tags,
        group: input.group,
        version: 0,
        created_at: now,
        updated_at: now,
    })
}

fn check_trigger(
    trigger: &Trigger,
    temporal: &std::collections::BTreeMap<String, TemporalPattern>,
    errors: &mut Vec<ValidationError>,
) {
    match trigger {
        Trigger::Event { pattern } | Trigger::Fact { pattern } | Trigger::Timer { pattern } => {
            if pattern.trim().is_empty() {
                errors.push(ValidationError::new("trigger.pattern", "trigger pattern must not be empty"));
            }
        }
        Trigger::Temporal { detector_id } => {
            let name = detector_id.rsplit(':').next().unwrap_or(detector_id);
            if !temporal.contains_key(name) {
                errors.push(ValidationError::new(
                    "trigger.detector_id",
                    format!("temporal trigger names unknown detector '{detector_id}'"),
                ));
            }
        }
    }
}

fn check_temporal_pattern(name: &str, pattern: &TemporalPattern, errors: &mut Vec<ValidationError>) {
    let path = format!("temporal.{name}");
    match pattern {
        TemporalPattern::Sequence { steps, .. } if steps.len() < 2 => {
            errors.push(ValidationError::new(path, "a sequence pattern needs at least two steps"));
        }
        TemporalPattern::Count { threshold, .. } if *threshold == 0 => {
            errors.push(ValidationError::new(path, "a count pattern's threshold must be positive"));
        }
        _ => {}
    }
}

fn check_action(idx: usize, action: &Action, errors: &mut Vec<ValidationError>) {
    let path = format!("actions[{idx}]");
    match action {
        Action::SetFact { key, .. } | Action::DeleteFact { key } if key.trim().is_empty() => {
            errors.push(ValidationError::new(path, "fact key must not be empty"));
        }
        Action::Emit { topic, .. } if topic.trim().is_empty() => {
            errors.push(ValidationError::new(path, "emit topic must not be empty"));
        }
        Action::SetTimer { timer } => {
            if timer.name.trim().is_empty() {
                errors.push(ValidationError::new(format!("{path}.timer.name"), "timer name must not be empty"));
            }
            if timer.duration == EngineDuration::from_millis(0) {
                errors.push(ValidationError::new(format!("{path}.timer.duration"), "timer duration must be positive"));
            }
        }
        Action::CallService { service, method, .. } => {
            if service.trim().is_empty() {
                errors.push(ValidationError::new(format!("{path}.service"), "service name must not be empty"));
            }
            if method.trim().is_empty() {
                errors.push(ValidationError::new(format!("{path}.method"), "method name must not be empty"));
            }
        }
        Action::Conditional { then_branch, .. } if then_branch.is_empty() => {
            errors.push(ValidationError::new(format!("{path}.then_branch"), "conditional must have a non-empty then branch"));
        }
        _ => {}
    }
}
