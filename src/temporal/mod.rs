//! Stateful temporal pattern detectors: sequence, absence, count, aggregate.
//!
//! Each detector is scoped to a single `"{rule_id}:{name}"` id (spec §4.6)
//! and owns its own sliding window of observations. The dispatcher feeds
//! every dispatched event to every detector whose source `pattern`
//! potentially applies, and periodically ticks each detector so
//! time-only completions (an `absence` window elapsing) are still caught
//! without a new event arriving.

pub mod absence;
pub mod aggregate;
pub mod count;
pub mod sequence;

use chrono::{DateTime, Utc};

use crate::event_bus::Event;
use crate::rule::TemporalPattern;

pub use absence::AbsenceState;
pub use aggregate::AggregateState;
pub use count::CountState;
pub use sequence::SequenceState;

/// Resolves a detector's group key for `event`: the empty string (a single
/// implicit group) when `group_by` is absent, otherwise the stringified
/// value at that dotted path, or the empty string if the path is missing.
/// Shared by all four detectors so partitioning behaves identically
/// everywhere `group_by` applies (spec §4.8).
#[must_use]
pub fn group_key(group_by: Option<&str>, event: &Event) -> String {
    match group_by {
        None => String::new(),
        Some(path) => event
            .data
            .get_path(path)
            .map(crate::value::Value::interpolated_string)
            .unwrap_or_default(),
    }
}

/// A completed temporal match, handed to the dispatcher as a `Temporal`
/// stimulus. `trigger_event` is the event that completed the match (the
/// last sequence step, the qualifying count/aggregate event, or the
/// `after` event for an absence pattern), bound to `trigger.event.*`.
#[derive(Debug, Clone)]
pub struct TemporalMatch {
    pub detector_id: String,
    pub matched_at: DateTime<Utc>,
    pub trigger_event: Option<Event>,
}

/// Per-kind detector state, dispatched by the owning rule's `TemporalPattern`.
pub enum DetectorState {
    Sequence(SequenceState),
    Absence(AbsenceState),
    Count(CountState),
    Aggregate(AggregateState),
}

impl DetectorState {
    #[must_use]
    pub fn new(detector_id: String, pattern: &TemporalPattern) -> Self {
        match pattern {
            TemporalPattern::Sequence { steps, window, group_by } => {
                Self::Sequence(SequenceState::new(detector_id, steps.clone(), *window, group_by.clone()))
            }
            TemporalPattern::Absence { after, absent, window, group_by } => {
                Self::Absence(AbsenceState::new(detector_id, after.clone(), absent.clone(), *window, group_by.clone()))
            }
            TemporalPattern::Count { pattern, threshold, window, sliding, group_by } => {
                Self::Count(CountState::new(detector_id, pattern.clone(), *threshold, *window, *sliding, group_by.clone()))
            }
            TemporalPattern::Aggregate { pattern, field, op, comparison, threshold, window, group_by } => {
                Self::Aggregate(AggregateState::new(
                    detector_id,
                    pattern.clone(),
                    field.clone(),
                    *op,
                    *comparison,
                    *threshold,
                    *window,
                    group_by.clone(),
                ))
            }
        }
    }

    /// Feeds a dispatched event to this detector, returning a completed
    /// match if this event closes the pattern.
    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> Option<TemporalMatch> {
        match self {
            Self::Sequence(s) => s.on_event(event, now),
            Self::Absence(s) => s.on_event(event, now),
            Self::Count(s) => s.on_event(event, now),
            Self::Aggregate(s) => s.on_event(event, now),
        }
    }

    /// Periodic sweep for completions that depend only on elapsed time
    /// (an `absence` window with no disqualifying event, a `sequence`
    /// step's `within` cap expiring).
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<TemporalMatch> {
        match self {
            Self::Sequence(s) => s.on_tick(now),
            Self::Absence(s) => s.on_tick(now),
            Self::Count(s) => {
                s.on_tick(now);
                None
            }
            Self::Aggregate(s) => {
                s.on_tick(now);
                None
            }
        }
    }
}
