//! `${path}` string interpolation and `{ref: "path"}` object substitution.
//!
//! Paths have prefixes: `event.<field>`, `fact.<key>` (the key itself may
//! contain further `${…}`), `context.<key>`, `trigger.fact.key`,
//! `trigger.fact.value`, `trigger.event.<field>`. Missing paths resolve to
//! `None` (used by `exists`; elsewhere rendered as an empty string).
//!
//! A `Condition.source` is documented with a colon-delimited fact prefix,
//! `fact:<key-pattern>`, rather than the dotted `fact.<key>` used everywhere
//! else a path is resolved — `resolve_path` recognizes both.

use crate::correlation::DispatchContext;
use crate::event_bus::Event;
use crate::fact_store::FactStore;
use crate::value::Value;

/// A trigger-bound fact (key, value) available to `trigger.fact.*` paths,
/// set when the stimulus that started this dispatch was a fact change.
#[derive(Debug, Clone)]
pub struct TriggerFactBinding {
    pub key: String,
    pub value: Value,
}

/// Everything a reference path can be resolved against for one stimulus.
pub struct ResolutionScope<'a> {
    pub event: Option<&'a Event>,
    pub facts: &'a FactStore,
    pub context: &'a DispatchContext,
    pub trigger_fact: Option<&'a TriggerFactBinding>,
    pub trigger_event: Option<&'a Event>,
}

impl<'a> ResolutionScope<'a> {
    /// Resolves a bare path (no `${}`/`ref` wrapper) to a concrete value, or
    /// `None` if the path does not resolve (prefix unknown, field missing).
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        if let Some(key_pattern) = path.strip_prefix("fact:") {
            let key = self.resolve_interpolated_string(key_pattern);
            return self.facts.get(&key);
        }

        let (prefix, rest) = path.split_once('.').unwrap_or((path, ""));
        match prefix {
            "event" => self.event.and_then(|e| {
                if rest.is_empty() {
                    Some(e.data.clone())
                } else {
                    e.data.get_path(rest).cloned()
                }
            }),
            "fact" => {
                let key = self.resolve_interpolated_string(rest);
                self.facts.get(&key)
            }
            "context" => self.context.values.get(rest).cloned(),
            "trigger" => self.resolve_trigger_path(rest),
            _ => None,
        }
    }

    fn resolve_trigger_path(&self, rest: &str) -> Option<Value> {
        let (kind, rest) = rest.split_once('.')?;
        match kind {
            "fact" => {
                let binding = self.trigger_fact?;
                match rest {
                    "key" => Some(Value::String(binding.key.clone())),
                    "value" => Some(binding.value.clone()),
                    _ => None,
                }
            }
            "event" => {
                let event = self.trigger_event?;
                if rest.is_empty() {
                    Some(event.data.clone())
                } else {
                    event.data.get_path(rest).cloned()
                }
            }
            _ => None,
        }
    }

    /// Substitutes every `${path}` occurrence in `input` with the
    /// stringified resolution of `path`; missing paths render as `""`.
    #[must_use]
    pub fn resolve_interpolated_string(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let path = &after[..end];
                    let resolved = self.resolve_path(path).map(|v| v.interpolated_string()).unwrap_or_default();
                    out.push_str(&resolved);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Resolves a `Value` that may itself be a `{ref: "path"}` object,
    /// preserving the referenced value's type rather than stringifying it.
    /// Plain strings still get `${}` interpolation; other literals pass
    /// through unchanged.
    #[must_use]
    pub fn resolve_value(&self, value: &Value) -> Value {
        if let Some(path) = ref_path(value) {
            return self.resolve_path(&path).unwrap_or(Value::Null);
        }
        match value {
            Value::String(s) => Value::String(self.resolve_interpolated_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), self.resolve_value(v))).collect())
            }
            other => other.clone(),
        }
    }
}

/// Returns the `path` of a `{ref: "path"}` object, if `value` is one.
fn ref_path(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    if obj.len() == 1 {
        obj.get("ref").and_then(Value::as_str).map(ToString::to_string)
    } else {
        None
    }
}
