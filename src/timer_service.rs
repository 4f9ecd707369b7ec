//! Named, optionally repeating timers.
//!
//! `set_timer` replaces any existing timer of the same resolved name.
//! `cancel_timer` is a no-op if absent. Firing emits the configured event,
//! carrying the correlation id captured at set time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;
use crate::duration::EngineDuration;
use crate::value::Value;

/// Repeat policy for a timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatSpec {
    pub interval: EngineDuration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
}

/// The event a timer fires on expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerExpirePayload {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

/// A timer registration (`set_timer` action payload / `TimerService` input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSpec {
    pub name: String,
    pub duration: EngineDuration,
    pub on_expire: TimerExpirePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatSpec>,
}

#[derive(Debug, Clone)]
struct ScheduledTimer {
    spec: TimerSpec,
    deadline: DateTime<Utc>,
    correlation_id: Option<CorrelationId>,
    fired_count: u64,
}

/// A timer that has reached its deadline and should fire.
#[derive(Debug, Clone)]
pub struct FiredTimer {
    pub name: String,
    pub topic: String,
    pub data: Value,
    pub correlation_id: Option<CorrelationId>,
}

/// Owns the timer table. Mutated only by the dispatcher thread; the
/// `take_expired` sweep is invoked from the dispatcher's periodic tick.
#[derive(Default)]
pub struct TimerService {
    timers: RwLock<HashMap<String, ScheduledTimer>>,
}

impl TimerService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Sets (replacing any existing) timer under `spec.name`.
    pub fn set_timer(&self, spec: TimerSpec, correlation_id: Option<CorrelationId>) {
        let deadline = Utc::now() + chrono::Duration::milliseconds(spec.duration.as_millis() as i64);
        let name = spec.name.clone();
        let mut guard = self.timers.write().expect("timer table lock poisoned");
        guard.insert(
            name,
            ScheduledTimer {
                spec,
                deadline,
                correlation_id,
                fired_count: 0,
            },
        );
    }

    /// Cancels the named timer. A no-op if absent.
    pub fn cancel_timer(&self, name: &str) {
        self.timers.write().expect("timer table lock poisoned").remove(name);
    }

    #[must_use]
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.timers.read().expect("timer table lock poisoned").contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.read().expect("timer table lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every scheduled timer, used by the engine's `stop()`.
    pub fn clear_all(&self) {
        self.timers.write().expect("timer table lock poisoned").clear();
    }

    /// Sweeps all timers past their deadline, returning their fire payloads
    /// and rescheduling repeats (up to `max_count`) or removing one-shots.
    pub fn take_expired(&self) -> Vec<FiredTimer> {
        let now = Utc::now();
        let mut guard = self.timers.write().expect("timer table lock poisoned");
        let mut fired = Vec::new();
        let mut to_remove = Vec::new();

        for (name, timer) in guard.iter_mut() {
            if timer.deadline > now {
                continue;
            }

            fired.push(FiredTimer {
                name: name.clone(),
                topic: timer.spec.on_expire.topic.clone(),
                data: timer.spec.on_expire.data.clone(),
                correlation_id: timer.correlation_id,
            });
            timer.fired_count += 1;

            match &timer.spec.repeat {
                Some(repeat) if repeat.max_count.is_none_or(|max| timer.fired_count < max) => {
                    timer.deadline = now + chrono::Duration::milliseconds(repeat.interval.as_millis() as i64);
                }
                _ => to_remove.push(name.clone()),
            }
        }

        for name in to_remove {
            guard.remove(&name);
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, ms: u64) -> TimerSpec {
        TimerSpec {
            name: name.to_string(),
            duration: EngineDuration::from_millis(ms),
            on_expire: TimerExpirePayload {
                topic: format!("{name}.expired"),
                data: Value::Null,
            },
            repeat: None,
        }
    }

    #[test]
    fn test_set_replaces_existing() {
        let service = TimerService::new();
        service.set_timer(spec("t1", 100_000), None);
        service.set_timer(spec("t1", 1), None);
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn test_cancel_is_noop_if_absent() {
        let service = TimerService::new();
        service.cancel_timer("missing");
        assert!(service.is_empty());
    }

    #[test]
    fn test_cancel_removes_scheduled_timer() {
        let service = TimerService::new();
        service.set_timer(spec("t1", 100_000), None);
        service.cancel_timer("t1");
        assert!(!service.is_scheduled("t1"));
    }

    #[test]
    fn test_take_expired_fires_past_deadline() {
        let service = TimerService::new();
        service.set_timer(spec("t1", 0), None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let fired = service.take_expired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].topic, "t1.expired");
        assert!(!service.is_scheduled("t1"));
    }

    #[test]
    fn test_take_expired_reschedules_repeat_until_max_count() {
        let mut s = spec("t1", 0);
        s.repeat = Some(RepeatSpec {
            interval: EngineDuration::from_millis(0),
            max_count: Some(2),
        });
        let service = TimerService::new();
        service.set_timer(s, None);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let first = service.take_expired();
        assert_eq!(first.len(), 1);
        assert!(service.is_scheduled("t1"));

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = service.take_expired();
        assert_eq!(second.len(), 1);
        assert!(!service.is_scheduled("t1"));
    }

    #[test]
    fn test_clear_all_cancels_every_timer() {
        let service = TimerService::new();
        service.set_timer(spec("t1", 100_000), None);
        service.set_timer(spec("t2", 100_000), None);
        service.clear_all();
        assert!(service.is_empty());
    }

    #[test]
    fn test_fired_timer_carries_correlation_id() {
        let service = TimerService::new();
        let id = CorrelationId::new();
        service.set_timer(spec("t1", 0), Some(id));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let fired = service.take_expired();
        assert_eq!(fired[0].correlation_id, Some(id));
    }
}
