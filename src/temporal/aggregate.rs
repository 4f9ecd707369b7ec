//! `aggregate` temporal pattern: a numeric field reduced (`sum`/`avg`/
//! `min`/`max`/`count`) over a sliding `window`, compared to `threshold`.
//!
//! Unlike `count`, every qualifying event re-fires a match while the
//! reduced value keeps satisfying the comparison — the one-shot-per-window
//! resolution only applies to `count`, so `aggregate` is left at its
//! literal per-event reading. An optional `group_by` reduces each group's
//! samples independently.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::duration::EngineDuration;
use crate::event_bus::{topic_matches, Event};
use crate::rule::AggregateOp;
use crate::rule::condition::Operator;

use super::{group_key, TemporalMatch};

#[derive(Default)]
struct GroupState {
    samples: VecDeque<(DateTime<Utc>, f64)>,
}

pub struct AggregateState {
    detector_id: String,
    pattern: String,
    field: String,
    op: AggregateOp,
    comparison: Operator,
    threshold: f64,
    window: EngineDuration,
    group_by: Option<String>,
    groups: HashMap<String, GroupState>,
}

impl AggregateState {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector_id: String,
        pattern: String,
        field: String,
        op: AggregateOp,
        comparison: Operator,
        threshold: f64,
        window: EngineDuration,
        group_by: Option<String>,
    ) -> Self {
        Self {
            detector_id,
            pattern,
            field,
            op,
            comparison,
            threshold,
            window,
            group_by,
            groups: HashMap::new(),
        }
    }

    fn prune(&self, group: &mut GroupState, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::milliseconds(self.window.as_millis() as i64);
        while matches!(group.samples.front(), Some((ts, _)) if *ts < cutoff) {
            group.samples.pop_front();
        }
    }

    fn reduce(&self, group: &GroupState) -> f64 {
        if group.samples.is_empty() {
            return 0.0;
        }
        match self.op {
            AggregateOp::Sum => group.samples.iter().map(|(_, v)| v).sum(),
            AggregateOp::Avg => {
                let sum: f64 = group.samples.iter().map(|(_, v)| v).sum();
                sum / group.samples.len() as f64
            }
            AggregateOp::Min => group.samples.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min),
            AggregateOp::Max => group.samples.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max),
            AggregateOp::Count => group.samples.len() as f64,
        }
    }

    fn satisfies(&self, reduced: f64) -> bool {
        match self.comparison {
            Operator::Eq => (reduced - self.threshold).abs() < f64::EPSILON,
            Operator::Neq => (reduced - self.threshold).abs() >= f64::EPSILON,
            Operator::Gt => reduced > self.threshold,
            Operator::Gte => reduced >= self.threshold,
            Operator::Lt => reduced < self.threshold,
            Operator::Lte => reduced <= self.threshold,
            _ => false,
        }
    }

    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let key = group_key(self.group_by.as_deref(), event);
        let matches = topic_matches(&self.pattern, &event.topic);
        let value = event.data.get_path(&self.field).and_then(crate::value::Value::as_number);
        let group = self.groups.entry(key).or_default();

        if !matches || value.is_none() {
            self.prune(group, now);
            return None;
        }
        group.samples.push_back((now, value.unwrap()));
        self.prune(group, now);

        if self.satisfies(self.reduce(group)) {
            Some(TemporalMatch {
                detector_id: self.detector_id.clone(),
                matched_at: now,
                trigger_event: Some(event.clone()),
            })
        } else {
            None
        }
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::milliseconds(self.window.as_millis() as i64);
        for group in self.groups.values_mut() {
            while matches!(group.samples.front(), Some((ts, _)) if *ts < cutoff) {
                group.samples.pop_front();
            }
        }
    }
}
