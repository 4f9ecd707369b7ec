//! Rule definitions: trigger, conditions, and actions.

pub mod action;
pub mod condition;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use action::Action;
pub use condition::Condition;
pub use registry::RuleRegistry;

use crate::duration::EngineDuration;

/// What starts evaluation of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when an event whose topic matches `pattern` is dispatched.
    Event { pattern: String },
    /// Fires when a fact whose key matches `pattern` changes.
    Fact { pattern: String },
    /// Fires when the named timer expires.
    Timer { pattern: String },
    /// Fires when a temporal detector completes a match. `detector_id`
    /// names one of the rule's own `temporal` definitions (spec §4.6).
    Temporal { detector_id: String },
}

/// A sequence sub-step: an event topic pattern plus an optional `within`
/// cap relative to the previous step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within: Option<EngineDuration>,
}

/// One of the four stateful temporal pattern definitions (spec §4.6).
///
/// Every variant carries an optional `group_by` — a dotted field extracted
/// from each observed event that partitions the detector's state (e.g.
/// `event.userId` so a `count` burst is tracked per-user rather than
/// globally).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemporalPattern {
    /// An ordered series of event topics, each within `within` of the last.
    Sequence {
        steps: Vec<SequenceStep>,
        window: EngineDuration,
        #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// `absent` topic must NOT occur within `window` after `after` fires.
    Absence {
        after: String,
        absent: String,
        window: EngineDuration,
        #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// At least `threshold` events matching `pattern` within a sliding
    /// (or, if `sliding` is false, tumbling) `window`.
    Count {
        pattern: String,
        threshold: u64,
        window: EngineDuration,
        #[serde(default = "default_sliding")]
        sliding: bool,
        #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// A numeric field reduced over a sliding `window`, compared to
    /// `threshold` via `comparison` (only `Gt`/`Gte`/`Lt`/`Lte`/`Eq`/`Neq`
    /// are meaningful here; other operators never match).
    Aggregate {
        pattern: String,
        field: String,
        op: AggregateOp,
        comparison: condition::Operator,
        threshold: f64,
        window: EngineDuration,
        #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
}

const fn default_sliding() -> bool {
    true
}

impl TemporalPattern {
    #[must_use]
    pub fn group_by(&self) -> Option<&str> {
        match self {
            Self::Sequence { group_by, .. }
            | Self::Absence { group_by, .. }
            | Self::Count { group_by, .. }
            | Self::Aggregate { group_by, .. } => group_by.as_deref(),
        }
    }
}

/// Reduction function for an `Aggregate` temporal pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// A registered rule: a trigger, zero or more named temporal detectors, a
/// set of ANDed guard conditions, and the actions run when the guards pass.
///
/// `version`, `created_at`, and `updated_at` are owned by `RuleRegistry`:
/// they are assigned at registration and `version`/`updated_at` bump on any
/// in-process mutation (enable/disable), per §3's "Ownership & lifecycle".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub temporal: std::collections::BTreeMap<String, TemporalPattern>,
    /// Conditions are ANDed; an empty list always passes.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Evaluates every ANDed condition against `scope`, short-circuiting on
    /// the first failure (spec §4.5: "the evaluator short-circuits").
    /// Returns the pass/fail verdict plus, if any leaf raised an evaluation
    /// error, the last such error for tracing.
    #[must_use]
    pub fn conditions_pass(
        &self,
        scope: &crate::reference::ResolutionScope<'_>,
    ) -> (bool, Option<crate::error::DispatchError>) {
        let mut last_err = None;
        for condition in &self.conditions {
            let (ok, err) = condition.evaluate(scope);
            if err.is_some() {
                last_err = err;
            }
            if !ok {
                return (false, last_err);
            }
        }
        (true, last_err)
    }
}
