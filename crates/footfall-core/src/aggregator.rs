//! Running entry/exit counts and the recent-activity log.
//!
//! Both event sources (the BLE link and the synthetic generator) feed the same
//! [`EventSink`], so consumers never need to know where an event came from.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::protocol::Direction;

/// Number of events kept in the [`ActivityLog`].
pub const ACTIVITY_LOG_CAPACITY: usize = 5;

/// A single decoded crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// When the crossing was observed (UTC).
    pub timestamp: DateTime<Utc>,

    /// Which way the person went.
    pub direction: Direction,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(direction: Direction) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
        }
    }
}

/// Running totals.
///
/// `current` is always `max(0, entrances - exits)`. `exits` itself is never
/// clamped, so it can exceed `entrances` when the sensor misses an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Counters {
    /// Total entries seen.
    #[schema(example = 12)]
    pub entrances: u64,

    /// Total exits seen.
    #[schema(example = 9)]
    pub exits: u64,

    /// People currently inside.
    #[schema(example = 3)]
    pub current: u64,
}

impl Counters {
    fn apply(&mut self, direction: Direction) {
        match direction {
            Direction::In => self.entrances += 1,
            Direction::Out => self.exits += 1,
        }
        self.current = self.entrances.saturating_sub(self.exits);
    }
}

/// Most-recent-first log of the last [`ACTIVITY_LOG_CAPACITY`] events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityLog {
    entries: VecDeque<Event>,
}

impl ActivityLog {
    /// Prepend an event, evicting the oldest one past capacity.
    pub fn push(&mut self, event: Event) {
        self.entries.push_front(event);
        self.entries.truncate(ACTIVITY_LOG_CAPACITY);
    }

    /// Number of events currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate from the most recent event to the oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    /// Copy the log out, most recent first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Event> {
        self.entries.iter().copied().collect()
    }
}

/// Counts crossings and remembers recent activity.
#[derive(Debug, Clone, Default)]
pub struct EventAggregator {
    counters: Counters,
    activity: ActivityLog,
    last_direction: Option<Direction>,
    unrecognized: u64,
}

impl EventAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded event.
    pub fn ingest(&mut self, event: Event) {
        self.counters.apply(event.direction);
        self.activity.push(event);
        self.last_direction = Some(event.direction);
    }

    /// Record a payload that did not decode. Counters and the log are untouched.
    pub fn note_unrecognized(&mut self) {
        self.unrecognized += 1;
    }

    /// Current totals.
    #[must_use]
    pub const fn counters(&self) -> Counters {
        self.counters
    }

    /// Recent activity, most recent first.
    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Direction of the most recent event, if any.
    #[must_use]
    pub const fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    /// How many payloads were dropped as unrecognized.
    #[must_use]
    pub const fn unrecognized(&self) -> u64 {
        self.unrecognized
    }
}

/// Destination for decoded events.
///
/// Implementations are called synchronously from whichever source is active.
pub trait EventSink: Send + Sync {
    /// A valid crossing was observed.
    fn ingest(&self, event: Event);

    /// A payload was received but did not decode.
    fn unrecognized(&self);
}

/// An [`EventAggregator`] shared between the link pump and the synthetic source.
#[derive(Debug, Default)]
pub struct SharedAggregator {
    inner: Mutex<EventAggregator>,
}

impl SharedAggregator {
    /// Create an empty shared aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the aggregator for reading.
    ///
    /// A poisoned lock is recovered: the aggregator has no multi-step
    /// invariants that a panic could leave half-applied.
    pub fn lock(&self) -> MutexGuard<'_, EventAggregator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for SharedAggregator {
    fn ingest(&self, event: Event) {
        let counters = {
            let mut aggregator = self.lock();
            aggregator.ingest(event);
            aggregator.counters()
        };
        tracing::debug!(
            direction = %event.direction,
            entrances = counters.entrances,
            exits = counters.exits,
            current = counters.current,
            "Crossing recorded"
        );
    }

    fn unrecognized(&self) {
        self.lock().note_unrecognized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(secs: i64, direction: Direction) -> Event {
        Event {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            direction,
        }
    }

    fn assert_invariant(counters: Counters) {
        let expected = counters.entrances.saturating_sub(counters.exits);
        assert_eq!(counters.current, expected, "{counters:?}");
    }

    #[test]
    fn test_counts_in_and_out() {
        let mut aggregator = EventAggregator::new();
        aggregator.ingest(event_at(1, Direction::In));
        aggregator.ingest(event_at(2, Direction::In));
        aggregator.ingest(event_at(3, Direction::Out));

        assert_eq!(
            aggregator.counters(),
            Counters {
                entrances: 2,
                exits: 1,
                current: 1
            }
        );
        assert_eq!(aggregator.last_direction(), Some(Direction::Out));
    }

    #[test]
    fn test_current_never_negative() {
        let mut aggregator = EventAggregator::new();
        aggregator.ingest(event_at(1, Direction::Out));
        aggregator.ingest(event_at(2, Direction::Out));

        let counters = aggregator.counters();
        assert_eq!(counters.current, 0);
        assert_eq!(counters.exits, 2);
        assert_eq!(counters.entrances, 0);
    }

    #[test]
    fn test_current_recomputed_from_totals() {
        // in, out, out, in: exits caught up with entrances, so nobody is inside.
        let mut aggregator = EventAggregator::new();
        for (i, direction) in [Direction::In, Direction::Out, Direction::Out, Direction::In]
            .into_iter()
            .enumerate()
        {
            aggregator.ingest(event_at(i as i64, direction));
            assert_invariant(aggregator.counters());
        }
        assert_eq!(aggregator.counters().current, 0);
    }

    #[test]
    fn test_invariant_holds_for_long_sequence() {
        let mut aggregator = EventAggregator::new();
        // Deterministic pseudo-random walk biased towards exits.
        let mut x: u32 = 7;
        for i in 0..500 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let direction = if (x >> 16) % 5 < 2 {
                Direction::In
            } else {
                Direction::Out
            };
            aggregator.ingest(event_at(i, direction));
            assert_invariant(aggregator.counters());
            assert!(aggregator.activity().len() <= ACTIVITY_LOG_CAPACITY);
        }
    }

    #[test]
    fn test_activity_log_most_recent_first_and_bounded() {
        let mut aggregator = EventAggregator::new();
        for secs in 0..8 {
            aggregator.ingest(event_at(secs, Direction::In));
        }

        let log = aggregator.activity().to_vec();
        assert_eq!(log.len(), ACTIVITY_LOG_CAPACITY);
        let stamps: Vec<i64> = log.iter().map(|e| e.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn test_unrecognized_does_not_touch_counts() {
        let mut aggregator = EventAggregator::new();
        aggregator.ingest(event_at(1, Direction::In));
        let before = aggregator.counters();
        let log_before = aggregator.activity().clone();

        aggregator.note_unrecognized();
        aggregator.note_unrecognized();

        assert_eq!(aggregator.counters(), before);
        assert_eq!(aggregator.activity(), &log_before);
        assert_eq!(aggregator.unrecognized(), 2);
        assert_eq!(aggregator.last_direction(), Some(Direction::In));
    }

    #[test]
    fn test_shared_aggregator_sink() {
        let shared = SharedAggregator::new();
        shared.ingest(Event::now(Direction::In));
        shared.unrecognized();

        let aggregator = shared.lock();
        assert_eq!(aggregator.counters().entrances, 1);
        assert_eq!(aggregator.unrecognized(), 1);
    }

    #[test]
    fn test_empty_aggregator() {
        let aggregator = EventAggregator::new();
        assert_eq!(aggregator.counters(), Counters::default());
        assert!(aggregator.activity().is_empty());
        assert_eq!(aggregator.last_direction(), None);
    }
}
