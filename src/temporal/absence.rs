//! `absence` temporal pattern: `absent` must NOT occur within `window`
//! after `after` fires. The match completes on the tick that observes the
//! window has elapsed with no disqualifying event — it can never complete
//! from `on_event` alone, since absence is proven by time passing, not by
//! an event arriving.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::duration::EngineDuration;
use crate::event_bus::{topic_matches, Event};

use super::{group_key, TemporalMatch};

struct Pending {
    after_event: Event,
    deadline: DateTime<Utc>,
}

pub struct AbsenceState {
    detector_id: String,
    after: String,
    absent: String,
    window: EngineDuration,
    group_by: Option<String>,
    pending: HashMap<String, Pending>,
}

impl AbsenceState {
    #[must_use]
    pub fn new(detector_id: String, after: String, absent: String, window: EngineDuration, group_by: Option<String>) -> Self {
        Self {
            detector_id,
            after,
            absent,
            window,
            group_by,
            pending: HashMap::new(),
        }
    }

    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let key = group_key(self.group_by.as_deref(), event);
        if topic_matches(&self.absent, &event.topic) && self.pending.contains_key(&key) {
            self.pending.remove(&key);
            return None;
        }
        if topic_matches(&self.after, &event.topic) {
            self.pending.insert(
                key,
                Pending {
                    after_event: event.clone(),
                    deadline: now + chrono::Duration::milliseconds(self.window.as_millis() as i64),
                },
            );
        }
        None
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let due_key = self
            .pending
            .iter()
            .find(|(_, pending)| now >= pending.deadline)
            .map(|(key, _)| key.clone())?;
        let pending = self.pending.remove(&due_key)?;
        Some(TemporalMatch {
            detector_id: self.detector_id.clone(),
            matched_at: now,
            trigger_event: Some(pending.after_event),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn state() -> AbsenceState {
        AbsenceState::new(
            "r1:no-confirm".to_string(),
            "order.shipped".to_string(),
            "order.delivered".to_string(),
            EngineDuration::from_millis(1000),
            None,
        )
    }

    #[test]
    fn test_absence_fires_when_window_elapses_undisturbed() {
        let mut s = state();
        let t0 = Utc::now();
        s.on_event(&Event::new("order.shipped", Value::Null, "t"), t0);
        assert!(s.on_tick(t0 + chrono::Duration::milliseconds(500)).is_none());
        let result = s.on_tick(t0 + chrono::Duration::milliseconds(1001));
        assert!(result.is_some());
    }

    #[test]
    fn test_absence_cancelled_by_absent_event() {
        let mut s = state();
        let t0 = Utc::now();
        s.on_event(&Event::new("order.shipped", Value::Null, "t"), t0);
        s.on_event(&Event::new("order.delivered", Value::Null, "t"), t0 + chrono::Duration::milliseconds(200));
        assert!(s.on_tick(t0 + chrono::Duration::milliseconds(1001)).is_none());
    }

    #[test]
    fn test_absence_noop_without_after_event() {
        let mut s = state();
        let t0 = Utc::now();
        assert!(s.on_tick(t0 + chrono::Duration::milliseconds(5000)).is_none());
    }

    #[test]
    fn test_absence_tracks_separate_deadlines_per_group() {
        let mut s = AbsenceState::new(
            "r1:no-confirm".to_string(),
            "order.shipped".to_string(),
            "order.delivered".to_string(),
            EngineDuration::from_millis(1000),
            Some("orderId".to_string()),
        );
        let t0 = Utc::now();
        let mut a = BTreeMap::new();
        a.insert("orderId".to_string(), Value::String("ord-a".into()));
        let mut b = BTreeMap::new();
        b.insert("orderId".to_string(), Value::String("ord-b".into()));

        s.on_event(&Event::new("order.shipped", Value::Object(a), "t"), t0);
        s.on_event(&Event::new("order.shipped", Value::Object(b.clone()), "t"), t0);
        // ord-b gets delivered in time; ord-a does not.
        s.on_event(&Event::new("order.delivered", Value::Object(b), "t"), t0 + chrono::Duration::milliseconds(200));

        let fired = s.on_tick(t0 + chrono::Duration::milliseconds(1001));
        assert!(fired.is_some());
        // Only one deadline should have been pending (ord-a); a second tick finds nothing.
        assert!(s.on_tick(t0 + chrono::Duration::milliseconds(2000)).is_none());
    }
}
