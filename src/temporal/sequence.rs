//! `sequence` temporal pattern: an ordered series of event topics, each
//! within its step's `within` cap of the previous, the whole chain within
//! an overall `window` of its first step.
//!
//! An optional `group_by` partitions progress by a dotted field extracted
//! from each event (e.g. `event.userId`), so two different users each
//! build up their own sequence progress independently.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::duration::EngineDuration;
use crate::event_bus::{topic_matches, Event};
use crate::rule::SequenceStep;

use super::{group_key, TemporalMatch};

#[derive(Default)]
struct Progress {
    index: usize,
    started_at: Option<DateTime<Utc>>,
    last_step_at: Option<DateTime<Utc>>,
}

pub struct SequenceState {
    detector_id: String,
    steps: Vec<SequenceStep>,
    window: EngineDuration,
    group_by: Option<String>,
    groups: HashMap<String, Progress>,
}

impl SequenceState {
    #[must_use]
    pub fn new(detector_id: String, steps: Vec<SequenceStep>, window: EngineDuration, group_by: Option<String>) -> Self {
        Self {
            detector_id,
            steps,
            window,
            group_by,
            groups: HashMap::new(),
        }
    }

    fn expired(window: EngineDuration, progress: &Progress, now: DateTime<Utc>) -> bool {
        progress
            .started_at
            .is_some_and(|started| now - started > chrono::Duration::milliseconds(window.as_millis() as i64))
    }

    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let key = group_key(self.group_by.as_deref(), event);
        let steps = &self.steps;
        let window = self.window;
        let progress = self.groups.entry(key.clone()).or_default();

        if progress.index > 0 && Self::expired(window, progress, now) {
            *progress = Progress::default();
        }

        let Some(step) = steps.get(progress.index) else {
            return None;
        };
        if !topic_matches(&step.pattern, &event.topic) {
            return None;
        }
        if progress.index > 0 {
            if let Some(within) = step.within {
                let since_last = now - progress.last_step_at.unwrap_or(now);
                if since_last > chrono::Duration::milliseconds(within.as_millis() as i64) {
                    *progress = Progress::default();
                    // Re-evaluate this same event against the (now reset) first step.
                    return self.on_event(event, now);
                }
            }
        }

        if progress.index == 0 {
            progress.started_at = Some(now);
        }
        progress.last_step_at = Some(now);
        progress.index += 1;

        if progress.index == self.steps.len() {
            let result = TemporalMatch {
                detector_id: self.detector_id.clone(),
                matched_at: now,
                trigger_event: Some(event.clone()),
            };
            self.groups.remove(&key);
            return Some(result);
        }

        None
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let window = self.window;
        for progress in self.groups.values_mut() {
            if progress.index > 0 && Self::expired(window, progress, now) {
                *progress = Progress::default();
            }
        }
        None
    }
}
