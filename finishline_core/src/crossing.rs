//! The "CROSSING" Detector - One Event per Physical Pass
//!
//! Decides, from the two most recent samples of a track, whether the entity
//! crossed the finish line *now*. Three gates stand between raw detector
//! output and a lap event:
//! 1. History guard: too few samples means no motion segment to test
//! 2. Geometry: the motion segment must touch the finish line
//! 3. Cooldown: a crossing too soon after the previous one is the same pass
//!    seen again (a car dwelling on the line, or jitter around it)
//!
//! An optional direction policy rejects passes the wrong way over the line.

use crate::entity_track::EntityTrack;
use crate::geometry::{FinishLine, Side};
use finishline_env::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// DIRECTION POLICY
// ============================================================================

/// Which way over the line counts as a crossing.
///
/// Sides are taken relative to the directed line `P1 → P2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossingDirection {
    /// Either direction counts
    #[default]
    Any,
    /// From the left side of `P1 → P2` to its right side
    LeftToRight,
    /// From the right side of `P1 → P2` to its left side
    RightToLeft,
}

impl CrossingDirection {
    /// Direction of the motion `from → to`, if it can be told.
    ///
    /// Motion that stays on the line (collinear) has no direction.
    pub fn of_motion(from: Side, to: Side) -> Option<CrossingDirection> {
        match (from, to) {
            (Side::Left, Side::Right) | (Side::Left, Side::On) | (Side::On, Side::Right) => {
                Some(CrossingDirection::LeftToRight)
            }
            (Side::Right, Side::Left) | (Side::Right, Side::On) | (Side::On, Side::Left) => {
                Some(CrossingDirection::RightToLeft)
            }
            _ => None,
        }
    }

    /// True if a crossing in `actual` direction satisfies this policy.
    pub fn permits(&self, actual: Option<CrossingDirection>) -> bool {
        match self {
            CrossingDirection::Any => true,
            policy => actual == Some(*policy),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CrossingDirection::Any => "any",
            CrossingDirection::LeftToRight => "left_to_right",
            CrossingDirection::RightToLeft => "right_to_left",
        }
    }
}

impl fmt::Display for CrossingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CrossingDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(CrossingDirection::Any),
            "left_to_right" | "ltr" => Ok(CrossingDirection::LeftToRight),
            "right_to_left" | "rtl" => Ok(CrossingDirection::RightToLeft),
            _ => Err(format!("Unknown crossing direction: {}", s)),
        }
    }
}

// ============================================================================
// DECISION
// ============================================================================

/// A confirmed crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub entity_id: EntityId,

    /// Timestamp of the sample that completed the crossing
    pub timestamp: f64,

    /// The entity's previous crossing, `None` for its first
    pub previous_crossing: Option<f64>,

    /// Direction of travel over the line, if it could be told
    pub direction: Option<CrossingDirection>,
}

impl CrossingEvent {
    pub fn is_first(&self) -> bool {
        self.previous_crossing.is_none()
    }
}

/// Outcome of evaluating one track against the line.
#[derive(Debug, Clone, PartialEq)]
pub enum CrossingDecision {
    /// Fewer samples than the minimum history
    NotEligible,
    /// No finish line has been set
    NoLine,
    /// Latest motion does not touch the line
    NoIntersection,
    /// Touched the line inside the cooldown window
    Debounced { since_last: f64 },
    /// Touched the line in a direction the policy rejects
    WrongDirection { direction: Option<CrossingDirection> },
    /// A new crossing
    Crossed(CrossingEvent),
}

impl CrossingDecision {
    /// The event, if this decision is a crossing.
    pub fn event(&self) -> Option<&CrossingEvent> {
        match self {
            CrossingDecision::Crossed(event) => Some(event),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<CrossingEvent> {
        match self {
            CrossingDecision::Crossed(event) => Some(event),
            _ => None,
        }
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Stateless crossing rules; all per-entity state lives in the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossingDetector {
    pub min_history_length: usize,
    pub lap_cooldown_seconds: f64,
    pub direction: CrossingDirection,
}

impl Default for CrossingDetector {
    fn default() -> Self {
        Self {
            min_history_length: 2,
            lap_cooldown_seconds: 2.0,
            direction: CrossingDirection::Any,
        }
    }
}

impl CrossingDetector {
    pub fn new(min_history_length: usize, lap_cooldown_seconds: f64, direction: CrossingDirection) -> Self {
        Self {
            min_history_length: min_history_length.max(2),
            lap_cooldown_seconds,
            direction,
        }
    }

    /// Evaluates the track's latest motion against the line.
    ///
    /// On `Crossed`, the track's `last_crossing_time` is advanced to the
    /// crossing sample's timestamp; every other outcome leaves it untouched.
    pub fn evaluate(&self, track: &mut EntityTrack, line: Option<&FinishLine>) -> CrossingDecision {
        if track.len() < self.min_history_length {
            return CrossingDecision::NotEligible;
        }
        let Some(line) = line else {
            return CrossingDecision::NoLine;
        };
        let Some((prev, cur)) = track.last_two() else {
            return CrossingDecision::NotEligible;
        };
        let (prev, cur) = (*prev, *cur);

        if !line.crossed(prev.point, cur.point) {
            return CrossingDecision::NoIntersection;
        }

        if let Some(last) = track.last_crossing_time {
            let since_last = cur.timestamp - last;
            if since_last < self.lap_cooldown_seconds {
                return CrossingDecision::Debounced { since_last };
            }
        }

        let direction = CrossingDirection::of_motion(line.side(prev.point), line.side(cur.point));
        if !self.direction.permits(direction) {
            return CrossingDecision::WrongDirection { direction };
        }

        let event = CrossingEvent {
            entity_id: track.entity_id().clone(),
            timestamp: cur.timestamp,
            previous_crossing: track.last_crossing_time,
            direction,
        };
        track.last_crossing_time = Some(cur.timestamp);

        CrossingDecision::Crossed(event)
    }
}

// ============================================================================
// TESTS
// ============================================================================
