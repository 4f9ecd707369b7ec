//! Action payloads and resolution.
//!
//! An `Action` as written in a rule still carries unresolved `${path}`/`ref`
//! expressions. `ActionExecutor::resolve` turns one into a [`ResolvedAction`]
//! — a concrete side effect the dispatcher applies against its owned
//! `FactStore`/`EventBus`/`TimerService`. Splitting resolution from
//! application keeps all mutation on the dispatcher's single thread while
//! keeping the reference-resolution logic reusable and independently
//! testable.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::reference::ResolutionScope;
use crate::rule::condition::Condition;
use crate::timer_service::TimerSpec;
use crate::value::Value;

/// Severity at which a `log` action writes its message via `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A rule action as authored — fields may contain `${path}` interpolation
/// or `{ref: "path"}` substitution, resolved at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetFact { key: String, value: Value },
    DeleteFact { key: String },
    Emit { topic: String, data: Value },
    SetTimer { timer: TimerSpec },
    CancelTimer { name: String },
    /// Invokes an external service by name. Remote execution itself is out
    /// of scope here; the dispatcher routes this to a registered
    /// `ServiceInvoker` and folds an absent/failing one into
    /// `ActionFailure`.
    CallService { service: String, method: String, args: Value },
    Log { level: LogLevel, message: String },
    /// Evaluates `predicate` and runs only the matching branch's actions,
    /// in order. Predicate evaluation errors fold to `false`, same as a
    /// rule's guard conditions.
    Conditional {
        predicate: Condition,
        #[serde(rename = "thenBranch")]
        then_branch: Vec<Action>,
        #[serde(rename = "elseBranch", default, skip_serializing_if = "Option::is_none")]
        else_branch: Option<Vec<Action>>,
    },
}

impl Action {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetFact { .. } => "set_fact",
            Self::DeleteFact { .. } => "delete_fact",
            Self::Emit { .. } => "emit",
            Self::SetTimer { .. } => "set_timer",
            Self::CancelTimer { .. } => "cancel_timer",
            Self::CallService { .. } => "call_service",
            Self::Log { .. } => "log",
            Self::Conditional { .. } => "conditional",
        }
    }
}

/// A fully resolved action, ready to be applied against live engine state.
#[derive(Debug, Clone)]
pub enum ResolvedAction {
    SetFact { key: String, value: Value },
    DeleteFact { key: String },
    Emit { topic: String, data: Value },
    SetTimer { timer: TimerSpec },
    CancelTimer { name: String },
    CallService { service: String, method: String, args: Value },
    Log { level: LogLevel, message: String },
    /// The already-selected, already-resolved branch of a `conditional`;
    /// the dispatcher applies each in order as if they were the rule's own
    /// action list.
    Branch(Vec<ResolvedAction>),
}

/// Resolves an `Action`'s interpolated fields against a dispatch scope.
pub struct ActionExecutor;

impl ActionExecutor {
    /// Interpolates every string/value field of `action` against `scope`.
    /// Missing paths render as an empty string rather than failing here —
    /// `${ref}`/`{ref:}` resolution never rejects a path outright. The
    /// dispatcher's `apply_*` functions reject the resolved result (e.g. an
    /// empty `set_fact` key) with `ReferenceResolutionError` once resolution
    /// is done.
    ///
    /// # Errors
    ///
    /// Only propagates a nested `conditional` branch's own resolution
    /// failure; this function has no direct failure case of its own.
    pub fn resolve(action: &Action, scope: &ResolutionScope<'_>) -> Result<ResolvedAction, DispatchError> {
        match action {
            Action::SetFact { key, value } => Ok(ResolvedAction::SetFact {
                key: scope.resolve_interpolated_string(key),
                value: scope.resolve_value(value),
            }),
            Action::DeleteFact { key } => Ok(ResolvedAction::DeleteFact {
                key: scope.resolve_interpolated_string(key),
            }),
            Action::Emit { topic, data } => Ok(ResolvedAction::Emit {
                topic: scope.resolve_interpolated_string(topic),
                data: scope.resolve_value(data),
            }),
            Action::SetTimer { timer } => Ok(ResolvedAction::SetTimer {
                timer: resolve_timer_spec(timer, scope),
            }),
            Action::CancelTimer { name } => Ok(ResolvedAction::CancelTimer {
                name: scope.resolve_interpolated_string(name),
            }),
            Action::CallService { service, method, args } => Ok(ResolvedAction::CallService {
                service: scope.resolve_interpolated_string(service),
                method: scope.resolve_interpolated_string(method),
                args: scope.resolve_value(args),
            }),
            Action::Log { level, message } => Ok(ResolvedAction::Log {
                level: *level,
                message: scope.resolve_interpolated_string(message),
            }),
            Action::Conditional { predicate, then_branch, else_branch } => {
                let (passed, _err) = predicate.evaluate(scope);
                let chosen = if passed {
                    Some(then_branch)
                } else {
                    else_branch.as_ref()
                };
                let resolved = match chosen {
                    Some(actions) => actions
                        .iter()
                        .map(|a| Self::resolve(a, scope))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => Vec::new(),
                };
                Ok(ResolvedAction::Branch(resolved))
            }
        }
    }
}

fn resolve_timer_spec(timer: &TimerSpec, scope: &ResolutionScope<'_>) -> TimerSpec {
    let mut resolved = timer.clone();
    resolved.name = scope.resolve_interpolated_string(&timer.name);
    resolved.on_expire.data = scope.resolve_value(&timer.on_expire.data);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::DispatchContext;
    use crate::duration::EngineDuration;
    use crate::event_bus::Event;
    use crate::fact_store::FactStore;
    use crate::timer_service::TimerExpirePayload;
    use std::collections::BTreeMap;

    fn scope_with_order<'a>(event: &'a Event, facts: &'a FactStore, ctx: &'a DispatchContext) -> ResolutionScope<'a> {
        ResolutionScope {
            event: Some(event),
            facts,
            context: ctx,
            trigger_fact: None,
            trigger_event: None,
        }
    }

    #[test]
    fn test_resolve_set_fact_interpolates_key_and_value() {
        let mut data = BTreeMap::new();
        data.insert("orderId".to_string(), Value::String("ord-1".into()));
        let event = Event::new("order.created", Value::Object(data), "test");
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = scope_with_order(&event, &facts, &ctx);

        let action = Action::SetFact {
            key: "order:${event.orderId}:status".to_string(),
            value: Value::String("pending".into()),
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::SetFact { key, value } => {
                assert_eq!(key, "order:ord-1:status");
                assert_eq!(value, Value::String("pending".into()));
            }
            _ => panic!("expected SetFact"),
        }
    }

    #[test]
    fn test_resolve_emit_preserves_ref_value_type() {
        let mut data = BTreeMap::new();
        data.insert("amount".to_string(), Value::Number(500.0));
        let event = Event::new("order.created", Value::Object(data), "test");
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = scope_with_order(&event, &facts, &ctx);

        let mut payload = BTreeMap::new();
        let mut ref_obj = BTreeMap::new();
        ref_obj.insert("ref".to_string(), Value::String("event.amount".into()));
        payload.insert("amount".to_string(), Value::Object(ref_obj));

        let action = Action::Emit {
            topic: "billing.charge".to_string(),
            data: Value::Object(payload),
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::Emit { topic, data } => {
                assert_eq!(topic, "billing.charge");
                assert_eq!(data.get_path("amount"), Some(&Value::Number(500.0)));
            }
            _ => panic!("expected Emit"),
        }
    }

    #[test]
    fn test_resolve_set_timer() {
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = ResolutionScope {
            event: None,
            facts: &facts,
            context: &ctx,
            trigger_fact: None,
            trigger_event: None,
        };
        let action = Action::SetTimer {
            timer: TimerSpec {
                name: "reminder".to_string(),
                duration: EngineDuration::from_millis(1000),
                on_expire: TimerExpirePayload {
                    topic: "reminder.fired".to_string(),
                    data: Value::Null,
                },
                repeat: None,
            },
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::SetTimer { timer } => assert_eq!(timer.name, "reminder"),
            _ => panic!("expected SetTimer"),
        }
    }

    #[test]
    fn test_action_name() {
        assert_eq!(Action::DeleteFact { key: "k".into() }.name(), "delete_fact");
    }

    #[test]
    fn test_resolve_call_service_resolves_args() {
        let mut data = BTreeMap::new();
        data.insert("orderId".to_string(), Value::String("ord-1".into()));
        let event = Event::new("order.created", Value::Object(data), "test");
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = scope_with_order(&event, &facts, &ctx);

        let action = Action::CallService {
            service: "billing".to_string(),
            method: "charge".to_string(),
            args: Value::String("${event.orderId}".to_string()),
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::CallService { service, method, args } => {
                assert_eq!(service, "billing");
                assert_eq!(method, "charge");
                assert_eq!(args, Value::String("ord-1".into()));
            }
            _ => panic!("expected CallService"),
        }
    }

    #[test]
    fn test_resolve_log_interpolates_message() {
        let mut data = BTreeMap::new();
        data.insert("orderId".to_string(), Value::String("ord-1".into()));
        let event = Event::new("order.created", Value::Object(data), "test");
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = scope_with_order(&event, &facts, &ctx);

        let action = Action::Log {
            level: LogLevel::Info,
            message: "order ${event.orderId} created".to_string(),
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::Log { level, message } => {
                assert_eq!(level, LogLevel::Info);
                assert_eq!(message, "order ord-1 created");
            }
            _ => panic!("expected Log"),
        }
    }

    #[test]
    fn test_resolve_conditional_picks_then_branch_when_predicate_passes() {
        let mut data = BTreeMap::new();
        data.insert("amount".to_string(), Value::Number(500.0));
        let event = Event::new("order.created", Value::Object(data), "test");
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = scope_with_order(&event, &facts, &ctx);

        let action = Action::Conditional {
            predicate: Condition {
                source: "event.amount".to_string(),
                operator: crate::rule::condition::Operator::Gt,
                value: Some(Value::Number(100.0)),
            },
            then_branch: vec![Action::Emit { topic: "order.large".to_string(), data: Value::Null }],
            else_branch: Some(vec![Action::Emit { topic: "order.small".to_string(), data: Value::Null }]),
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::Branch(actions) => {
                assert_eq!(actions.len(), 1);
                assert!(matches!(&actions[0], ResolvedAction::Emit { topic, .. } if topic == "order.large"));
            }
            _ => panic!("expected Branch"),
        }
    }

    #[test]
    fn test_resolve_conditional_with_no_else_and_failed_predicate_is_empty_branch() {
        let facts = FactStore::new();
        let ctx = DispatchContext::default();
        let scope = ResolutionScope {
            event: None,
            facts: &facts,
            context: &ctx,
            trigger_fact: None,
            trigger_event: None,
        };
        let action = Action::Conditional {
            predicate: Condition {
                source: "event.missing".to_string(),
                operator: crate::rule::condition::Operator::Exists,
                value: None,
            },
            then_branch: vec![Action::Emit { topic: "should.not.fire".to_string(), data: Value::Null }],
            else_branch: None,
        };
        let resolved = ActionExecutor::resolve(&action, &scope).unwrap();
        match resolved {
            ResolvedAction::Branch(actions) => assert!(actions.is_empty()),
            _ => panic!("expected Branch"),
        }
    }
}
