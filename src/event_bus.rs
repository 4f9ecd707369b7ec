//! Topic pub/sub with wildcard patterns.
//!
//! `emit` synthesizes an `Event`, delivers it to every subscriber whose
//! pattern matches the topic (registration order), and hands it to the
//! dispatcher as a stimulus. The bus itself does not run rules — it only
//! fans events out to subscribers; the dispatcher owns the rule cascade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::glob::segment_glob_match;
use crate::value::Value;

/// Unique identifier for an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An emitted event. Topics are dotted (`order.paid`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub topic: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl Event {
    #[must_use]
    pub fn new(topic: impl Into<String>, data: Value, source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            data,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Returns true iff `pattern` matches `topic` under the event-topic glob
/// rules: `*` matches any topic; `a.*` matches one-or-more trailing
/// segments; exact patterns match only themselves.
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    segment_glob_match(pattern, topic, '.')
}

type SubscriberHandler = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    pattern: String,
    handler: SubscriberHandler,
}

/// Subscriber-id-keyed pub/sub registry for emitted events.
///
/// Delivery order to subscribers is registration order, per §4.1. The bus
/// itself does not serialize emission — that discipline belongs to the
/// dispatcher's single-worker-thread cooperative scheduler; `EventBus` is
/// the passive fan-out table the dispatcher drives.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    /// Registers a subscriber for topics matching `pattern`.
    pub fn subscribe<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.push(Subscriber {
            pattern: pattern.into(),
            handler: Box::new(handler),
        });
    }

    /// Delivers `event` to every subscriber whose pattern matches its topic,
    /// in registration order.
    pub fn dispatch_to_subscribers(&self, event: &Event) {
        for sub in &self.subscribers {
            if topic_matches(&sub.pattern, &event.topic) {
                (sub.handler)(event);
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
