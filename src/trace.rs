//! Volatile, opt-in execution tracing (spec §4.10).
//!
//! Unlike `AuditLog`, nothing here is persisted: `TraceCollector` is a
//! fixed-capacity ring that exists purely so an operator can flip tracing on,
//! watch one rule's full trigger → condition → action path, and flip it back
//! off. Disabled by default so `record()` is a single atomic load on the hot
//! path when nobody is watching.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::value::Value;

/// Every point in a cascade worth tracing (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    EventEmitted,
    RuleTriggered,
    ConditionEvaluated,
    ConditionError,
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    RuleExecuted,
    RuleSkipped,
}

/// One traced point, carrying whatever rule/correlation context applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: TraceEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub details: Value,
}

/// Filter for `TraceCollector::query`. `None` fields allow all.
#[derive(Debug, Clone, Default)]
pub struct TraceQueryFilter {
    pub rule_id: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub event_type: Option<TraceEventType>,
}

impl TraceQueryFilter {
    fn matches(&self, entry: &TraceEntry) -> bool {
        if let Some(rid) = &self.rule_id {
            if entry.rule_id.as_deref() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(cid) = self.correlation_id {
            if entry.correlation_id != Some(cid) {
                return false;
            }
        }
        if let Some(et) = self.event_type {
            if entry.event_type != et {
                return false;
            }
        }
        true
    }
}

type Subscriber = Box<dyn Fn(&TraceEntry) + Send + Sync>;

/// Fixed-capacity, disabled-by-default trace ring.
pub struct TraceCollector {
    capacity: usize,
    enabled: AtomicBool,
    entries: RwLock<VecDeque<TraceEntry>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl TraceCollector {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            enabled: AtomicBool::new(false),
            entries: RwLock::new(VecDeque::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a subscriber notified (best-effort, isolated) on every
    /// `record()` while tracing is enabled — the same fan-out seam
    /// `AuditLog::subscribe` offers, used by `SSEFanout`'s debug stream.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&TraceEntry) + Send + Sync + 'static,
    {
        self.subscribers.write().expect("trace subscriber lock poisoned").push(Box::new(handler));
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// No-op when tracing is disabled — the common case on the dispatch hot
    /// path.
    pub fn record(
        &self,
        event_type: TraceEventType,
        rule_id: Option<&str>,
        rule_name: Option<&str>,
        correlation_id: Option<CorrelationId>,
        duration_ms: Option<u64>,
        details: Value,
    ) {
        if !self.is_enabled() {
            return;
        }
        let entry = TraceEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            rule_id: rule_id.map(str::to_string),
            rule_name: rule_name.map(str::to_string),
            correlation_id,
            duration_ms,
            details,
        };

        {
            let mut guard = self.entries.write().expect("trace lock poisoned");
            guard.push_back(entry.clone());
            while guard.len() > self.capacity {
                guard.pop_front();
            }
        }

        for subscriber in self.subscribers.read().expect("trace subscriber lock poisoned").iter() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(&entry)));
        }
    }

    /// Clears every buffered entry without touching the enabled flag.
    pub fn clear(&self) {
        self.entries.write().expect("trace lock poisoned").clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("trace lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn query(&self, filter: TraceQueryFilter) -> Vec<TraceEntry> {
        self.entries
            .read()
            .expect("trace lock poisoned")
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default_records_nothing() {
        let trace = TraceCollector::new(10);
        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Null);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_enable_then_record() {
        let trace = TraceCollector::new(10);
        trace.enable();
        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Null);
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_disable_stops_recording_but_keeps_history() {
        let trace = TraceCollector::new(10);
        trace.enable();
        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Null);
        trace.disable();
        trace.record(TraceEventType::RuleExecuted, Some("r1"), Some("Rule"), None, None, Value::Null);
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_ring_evicts_oldest_past_capacity() {
        let trace = TraceCollector::new(3);
        trace.enable();
        for i in 0..5 {
            trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Number(i as f64));
        }
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn test_subscriber_notified_only_while_enabled() {
        let trace = TraceCollector::new(10);
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = std::sync::Arc::clone(&count);
        trace.subscribe(move |_| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Null);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);

        trace.enable();
        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), None, None, Value::Null);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_query_by_rule_id_and_correlation() {
        let trace = TraceCollector::new(10);
        trace.enable();
        let cid = CorrelationId::new();
        trace.record(TraceEventType::RuleTriggered, Some("r1"), Some("Rule"), Some(cid), None, Value::Null);
        trace.record(TraceEventType::RuleTriggered, Some("r2"), Some("Rule"), None, None, Value::Null);

        let by_rule = trace.query(TraceQueryFilter { rule_id: Some("r1".to_string()), ..Default::default() });
        assert_eq!(by_rule.len(), 1);

        let by_correlation = trace.query(TraceQueryFilter { correlation_id: Some(cid), ..Default::default() });
        assert_eq!(by_correlation.len(), 1);
    }
}
