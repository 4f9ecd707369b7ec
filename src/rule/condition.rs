//! Guard conditions evaluated against a rule's resolution scope.
//!
//! Per spec §4.5/§7: a condition that raises an evaluation error (bad
//! regex, comparing incompatible types) never propagates — it folds to
//! `false` and the reason is handed back to the caller for tracing.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::glob::cached_regex;
use crate::reference::ResolutionScope;
use crate::value::Value;

/// Comparison/membership operator for a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    Matches,
    Exists,
}

/// A single comparison: `source` resolved against the dispatch scope,
/// compared to `value` via `operator`. Rule-level ANDing of a `Vec<Condition>`
/// covers conjunction; the spec has no nested boolean combinators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub source: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    /// Evaluates this condition against `scope`. An evaluation error folds
    /// to `Ok(false)` with the error retained for the trace; only
    /// structural issues (operator/value shape mismatch) return `Err`.
    pub fn evaluate(&self, scope: &ResolutionScope<'_>) -> (bool, Option<DispatchError>) {
        evaluate_leaf(scope, &self.source, self.operator, self.value.as_ref())
    }
}

fn evaluate_leaf(
    scope: &ResolutionScope<'_>,
    source: &str,
    operator: Operator,
    expected: Option<&Value>,
) -> (bool, Option<DispatchError>) {
    let actual = scope.resolve_path(source);

    if operator == Operator::Exists {
        return (actual.is_some(), None);
    }

    let Some(actual) = actual else {
        return (false, None);
    };

    let expected = match expected {
        Some(v) => scope.resolve_value(v),
        None => {
            let err = DispatchError::ConditionEvaluationError(format!("operator {operator:?} requires a value"));
            return (false, Some(err));
        }
    };

    match operator {
        Operator::Eq => (values_eq(&actual, &expected), None),
        Operator::Neq => (!values_eq(&actual, &expected), None),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => compare_numeric(operator, &actual, &expected),
        Operator::In => (member_of(&actual, &expected), None),
        Operator::NotIn => (!member_of(&actual, &expected), None),
        Operator::Contains => (contains(&actual, &expected), None),
        Operator::Matches => evaluate_matches(&actual, &expected),
        Operator::Exists => unreachable!("handled above"),
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    a == b
}

fn compare_numeric(operator: Operator, actual: &Value, expected: &Value) -> (bool, Option<DispatchError>) {
    let ordering = if let (Some(a), Some(b)) = (actual.as_number(), expected.as_number()) {
        a.partial_cmp(&b)
    } else if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        Some(a.cmp(b))
    } else {
        None
    };

    let Some(ordering) = ordering else {
        let err = DispatchError::ConditionEvaluationError(format!(
            "cannot compare {} and {}: not both numeric or both strings",
            actual.type_name(),
            expected.type_name()
        ));
        return (false, Some(err));
    };

    let result = match operator {
        Operator::Gt => ordering.is_gt(),
        Operator::Gte => ordering.is_ge(),
        Operator::Lt => ordering.is_lt(),
        Operator::Lte => ordering.is_le(),
        _ => unreachable!("only numeric comparison operators reach here"),
    };
    (result, None)
}

fn member_of(actual: &Value, expected: &Value) -> bool {
    match expected.as_array() {
        Some(items) => items.iter().any(|item| item == actual),
        None => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| item == expected),
        Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        _ => false,
    }
}

fn evaluate_matches(actual: &Value, expected: &Value) -> (bool, Option<DispatchError>) {
    let (Some(haystack), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
        let err = DispatchError::ConditionEvaluationError("matches requires string operands".to_string());
        return (false, Some(err));
    };
    match cached_regex(pattern) {
        Ok(re) => (re.is_match(haystack), None),
        Err(e) => (false, Some(DispatchError::ConditionEvaluationError(e.to_string()))),
    }
}
