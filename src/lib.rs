//! # reflexive
//!
//! An embeddable reactive rule engine: events, facts, timers, and temporal
//! pattern detection dispatched over a single-threaded cooperative core.
//!
//! A `Rule` binds one `Trigger` (an event topic pattern, a fact-key pattern,
//! a named timer, or a completed temporal detector) to an ordered list of
//! ANDed guard `Condition`s and an ordered list of `Action`s. Emitting an
//! event, changing a fact, or a timer firing is a *stimulus*: the
//! `Dispatcher` runs every matching enabled rule in `(priority desc,
//! insertion asc)` order, and any stimuli its actions produce are queued and
//! drained breadth-first until the cascade reaches a fixed point or the
//! configured `cascade_depth` is exceeded.
//!
//! Every stimulus and the rules it triggers are recorded to `AuditLog`
//! (persisted, indexed, queryable) and, opt-in, to `TraceCollector` (an
//! in-memory execution trace). Behind the `fanout` feature, `SseFanout`
//! streams both out to connected clients and `WebhookFanout` delivers
//! HMAC-signed HTTP callbacks with retry backoff.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reflexive::{Engine, EngineConfig};
//! use reflexive::audit::storage::InMemoryStorageAdapter;
//! use reflexive::rule_input::RuleInput;
//! use std::sync::Arc;
//!
//! struct NoServices;
//! impl reflexive::dispatcher::ServiceInvoker for NoServices {
//!     fn invoke(&self, service: &str, method: &str, _args: &reflexive::Value) -> Result<reflexive::Value, String> {
//!         Err(format!("no service invoker configured for '{service}.{method}'"))
//!     }
//! }
//!
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryStorageAdapter::new()),
//!     Arc::new(NoServices),
//! );
//!
//! engine.dispatcher().set_fact("order:1:status", reflexive::Value::String("paid".into()), None)?;
//! engine.stop()?;
//! # Ok::<(), reflexive::EngineError>(())
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod correlation;
pub mod dispatcher;
pub mod duration;
pub mod engine;
pub mod error;
pub mod event_bus;
#[cfg(feature = "fanout")]
pub mod fanout;
pub mod fact_store;
pub mod glob;
pub mod persistence;
pub mod reference;
pub mod rule;
pub mod rule_input;
pub mod temporal;
pub mod timer_service;
pub mod trace;
pub mod value;

pub use audit::{AuditCategory, AuditEntry, AuditEventType, AuditLog, AuditLogConfig, AuditQueryFilter, AuditQueryResult};
pub use correlation::{CorrelationId, DispatchContext};
pub use dispatcher::{Dispatcher, DispatcherConfig, ServiceInvoker};
pub use duration::EngineDuration;
pub use engine::{Engine, EngineConfig};
pub use error::{DispatchError, EngineError, EngineResult, ValidationError};
pub use event_bus::{Event, EventBus};
#[cfg(feature = "fanout")]
pub use fanout::{DeliveryResult, SseConnectionId, SseFanout, SseFilter, SseSink, WebhookFanout, WebhookFanoutConfig, WebhookId, WebhookRegistration};
pub use fact_store::FactStore;
pub use persistence::{PersistenceConfig, PersistenceShim};
pub use rule::{Action, Condition, Rule, RuleRegistry, Trigger};
pub use rule_input::RuleInput;
pub use timer_service::{TimerService, TimerSpec};
pub use trace::{TraceCollector, TraceEntry, TraceEventType};
pub use value::Value;
