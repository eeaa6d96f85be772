//! Per-entity motion history.
//!
//! A track holds the most recent samples for one entity in a bounded ring
//! (oldest evicted first) plus the time of its last accepted crossing.
//!
//! When an entity disappears for longer than the track's maximum gap, the
//! history restarts from the next sample: a motion segment spanning the gap
//! is not motion the camera actually saw.

use finishline_env::{EntityId, Point};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One observed position of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub point: Point,
    /// Capture time in seconds
    pub timestamp: f64,
}

impl Sample {
    pub fn new(point: Point, timestamp: f64) -> Self {
        Self { point, timestamp }
    }
}

/// Result of pushing a sample into a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sample stored
    Accepted,
    /// Sample stored and the oldest sample evicted
    Evicted,
    /// Sample arrived after the maximum gap; history restarted from it
    Restarted,
    /// Sample discarded; the track is unchanged
    Rejected(DropReason),
}

/// Why a sample was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Timestamp earlier than the last stored sample
    OutOfOrder,
    /// Timestamp equal to the last stored sample
    Duplicate,
    /// NaN or infinite coordinate or timestamp
    NonFinite,
}

/// Bounded motion history and crossing state for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTrack {
    entity_id: EntityId,
    samples: VecDeque<Sample>,
    capacity: usize,
    /// Longest tolerated silence between consecutive samples
    max_gap: Option<f64>,
    /// Time of the last accepted crossing
    pub last_crossing_time: Option<f64>,
}

impl EntityTrack {
    /// Creates an empty track. A zero capacity is bumped to one.
    pub fn new(entity_id: EntityId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entity_id,
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max_gap: None,
            last_crossing_time: None,
        }
    }

    /// Sets the longest gap between samples before the history restarts.
    pub fn with_max_gap(mut self, max_gap: f64) -> Self {
        self.max_gap = Some(max_gap);
        self
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends a sample, evicting the oldest one when full.
    ///
    /// Samples that do not advance time are rejected so the history stays
    /// strictly time-ordered.
    pub fn push(&mut self, sample: Sample) -> PushOutcome {
        if !sample.point.is_finite() || !sample.timestamp.is_finite() {
            return PushOutcome::Rejected(DropReason::NonFinite);
        }

        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return PushOutcome::Rejected(DropReason::OutOfOrder);
            }
            if sample.timestamp == last.timestamp {
                return PushOutcome::Rejected(DropReason::Duplicate);
            }
            if self.max_gap.is_some_and(|gap| sample.timestamp - last.timestamp > gap) {
                self.samples.clear();
                self.samples.push_back(sample);
                return PushOutcome::Restarted;
            }
        }

        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front();
            true
        } else {
            false
        };
        self.samples.push_back(sample);

        if evicted {
            PushOutcome::Evicted
        } else {
            PushOutcome::Accepted
        }
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The two most recent samples as `(previous, current)`.
    pub fn last_two(&self) -> Option<(&Sample, &Sample)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((&self.samples[n - 2], &self.samples[n - 1]))
    }

    /// Iterates oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Drops all history and the crossing reference.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_crossing_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f64, y: f64, t: f64) -> Sample {
        Sample::new(Point::new(x, y), t)
    }

    fn track(capacity: usize) -> EntityTrack {
        EntityTrack::new(EntityId::from("blue-car"), capacity)
    }

    #[test]
    fn test_push_and_evict() {
        let mut track = track(2);

        assert_eq!(track.push(sample(0.0, 0.0, 0.0)), PushOutcome::Accepted);
        assert_eq!(track.push(sample(1.0, 0.0, 0.1)), PushOutcome::Accepted);
        assert_eq!(track.push(sample(2.0, 0.0, 0.2)), PushOutcome::Evicted);

        assert_eq!(track.len(), 2);
        let (prev, cur) = track.last_two().unwrap();
        assert_eq!(prev.timestamp, 0.1);
        assert_eq!(cur.timestamp, 0.2);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut track = track(4);
        track.push(sample(0.0, 0.0, 1.0));

        assert_eq!(
            track.push(sample(1.0, 1.0, 0.5)),
            PushOutcome::Rejected(DropReason::OutOfOrder)
        );
        assert_eq!(track.len(), 1);
        assert_eq!(track.latest().unwrap().timestamp, 1.0);
    }

    #[test]
    fn test_rejects_duplicate_timestamp() {
        let mut track = track(4);
        track.push(sample(0.0, 0.0, 1.0));

        assert_eq!(
            track.push(sample(5.0, 5.0, 1.0)),
            PushOutcome::Rejected(DropReason::Duplicate)
        );
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut track = track(4);
        assert_eq!(
            track.push(sample(f64::NAN, 0.0, 1.0)),
            PushOutcome::Rejected(DropReason::NonFinite)
        );
        assert_eq!(
            track.push(sample(0.0, 0.0, f64::INFINITY)),
            PushOutcome::Rejected(DropReason::NonFinite)
        );
        assert!(track.is_empty());
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut track = track(3);
        for i in 0..20 {
            track.push(sample(i as f64, 0.0, i as f64 * 0.1));
            assert!(track.len() <= track.capacity());
        }

        let times: Vec<f64> = track.samples().map(|s| s.timestamp).collect();
        assert_eq!(times.len(), 3);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_gap_restarts_history() {
        let mut track = track(2).with_max_gap(2.0);
        track.push(sample(100.0, 110.0, 0.1));
        track.last_crossing_time = Some(0.1);

        assert_eq!(track.push(sample(100.0, 90.0, 5.1)), PushOutcome::Restarted);
        assert_eq!(track.len(), 1);
        assert!(track.last_two().is_none());
        // The crossing reference survives a tracking gap
        assert_eq!(track.last_crossing_time, Some(0.1));

        // A gap equal to the limit is still continuous motion
        assert_eq!(track.push(sample(100.0, 110.0, 7.1)), PushOutcome::Accepted);
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn test_zero_capacity_bumped() {
        let track = track(0);
        assert_eq!(track.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let mut track = track(2);
        track.push(sample(0.0, 0.0, 0.0));
        track.last_crossing_time = Some(0.0);

        track.clear();
        assert!(track.is_empty());
        assert!(track.last_crossing_time.is_none());
    }
}
