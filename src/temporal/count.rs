//! `count` temporal pattern: at least `threshold` events matching `pattern`
//! within a `window`, either `sliding` (the window trails the current
//! moment) or tumbling (the window resets to a fresh bucket once it
//! elapses).
//!
//! Fires once per window crossing, not on every event while still over
//! threshold: once armed, the detector stays silent until the count drops
//! back below `threshold` (events aging out of the window, or the bucket
//! rolling over) and crosses again. An optional `group_by` tracks each
//! group's count independently.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::duration::EngineDuration;
use crate::event_bus::{topic_matches, Event};

use super::{group_key, TemporalMatch};

#[derive(Default)]
struct GroupState {
    timestamps: VecDeque<DateTime<Utc>>,
    bucket_start: Option<DateTime<Utc>>,
    armed: bool,
}

pub struct CountState {
    detector_id: String,
    pattern: String,
    threshold: u64,
    window: EngineDuration,
    sliding: bool,
    group_by: Option<String>,
    groups: HashMap<String, GroupState>,
}

impl CountState {
    #[must_use]
    pub fn new(
        detector_id: String,
        pattern: String,
        threshold: u64,
        window: EngineDuration,
        sliding: bool,
        group_by: Option<String>,
    ) -> Self {
        Self {
            detector_id,
            pattern,
            threshold,
            window,
            sliding,
            group_by,
            groups: HashMap::new(),
        }
    }

    fn roll(&self, state: &mut GroupState, now: DateTime<Utc>) {
        if self.sliding {
            let cutoff = now - chrono::Duration::milliseconds(self.window.as_millis() as i64);
            while matches!(state.timestamps.front(), Some(ts) if *ts < cutoff) {
                state.timestamps.pop_front();
            }
        } else {
            let expired = state
                .bucket_start
                .is_some_and(|start| now - start >= chrono::Duration::milliseconds(self.window.as_millis() as i64));
            if expired || state.bucket_start.is_none() {
                state.timestamps.clear();
                state.bucket_start = Some(now);
                state.armed = false;
            }
        }
    }

    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> Option<TemporalMatch> {
        let key = group_key(self.group_by.as_deref(), event);
        let matches = topic_matches(&self.pattern, &event.topic);
        let state = self.groups.entry(key).or_default();

        self.roll_into(state, now);
        if !matches {
            Self::update_armed(state, self.threshold);
            return None;
        }
        state.timestamps.push_back(now);
        self.roll_into(state, now);

        let crossed = state.timestamps.len() as u64 >= self.threshold;
        let fire = crossed && !state.armed;
        state.armed = crossed;

        if fire {
            Some(TemporalMatch {
                detector_id: self.detector_id.clone(),
                matched_at: now,
                trigger_event: Some(event.clone()),
            })
        } else {
            None
        }
    }

    /// Prunes/rolls all groups so armed flags reflect the current window
    /// even without a new matching event; never fires on its own.
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        for state in self.groups.values_mut() {
            if self.sliding {
                let cutoff = now - chrono::Duration::milliseconds(self.window.as_millis() as i64);
                while matches!(state.timestamps.front(), Some(ts) if *ts < cutoff) {
                    state.timestamps.pop_front();
                }
            } else {
                let expired = state
                    .bucket_start
                    .is_some_and(|start| now - start >= chrono::Duration::milliseconds(self.window.as_millis() as i64));
                if expired {
                    state.timestamps.clear();
                    state.bucket_start = Some(now);
                    state.armed = false;
                }
            }
            Self::update_armed(state, self.threshold);
        }
    }

    fn roll_into(&self, state: &mut GroupState, now: DateTime<Utc>) {
        self.roll(state, now);
    }

    fn update_armed(state: &mut GroupState, threshold: u64) {
        if (state.timestamps.len() as u64) < threshold {
            state.armed = false;
        }
    }
}
