//! The "GEOMETRY" Module - Segment Intersection and Side-of-Line Tests
//!
//! Pure, stateless functions over frame-pixel coordinates:
//! - `intersects`: inclusive segment/segment test (touching and collinear
//!   overlap count, since a car sitting exactly on the line has crossed it)
//! - `side_of`: which side of a directed line a point lies on
//!
//! Also home to [`FinishLine`], the validated segment the crossing detector
//! tests against, and [`LineDraft`], the two-click operator entry for it.

use crate::config::ConfigError;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

pub use finishline_env::Point;

/// A directed segment `(start, end)`.
pub type Segment = (Point, Point);

// ============================================================================
// ORIENTATION PRIMITIVES
// ============================================================================

#[inline]
fn vec2(p: Point) -> Vector2<f64> {
    Vector2::new(p.x, p.y)
}

/// 2D cross product of `(b - a)` and `(c - a)`.
///
/// Positive when `a → b → c` turns counter-clockwise (in a y-up frame).
#[inline]
pub fn cross(a: Point, b: Point, c: Point) -> f64 {
    (vec2(b) - vec2(a)).perp(&(vec2(c) - vec2(a)))
}

/// Sign of the orientation of the triple: -1, 0 or 1.
#[inline]
fn orientation(a: Point, b: Point, c: Point) -> i8 {
    let value = cross(a, b, c);
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

/// True if `q` lies inside the bounding box of `p`–`r`.
/// Only meaningful when the three points are already known to be collinear.
#[inline]
fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

#[inline]
fn is_degenerate(seg: &Segment) -> bool {
    !seg.0.is_finite() || !seg.1.is_finite() || seg.0 == seg.1
}

// ============================================================================
// PUBLIC TESTS
// ============================================================================

/// Returns true iff the two segments properly intersect or touch.
///
/// Collinear overlap is an intersection. A segment with equal endpoints or a
/// NaN/infinite coordinate never intersects anything.
pub fn intersects(seg_a: Segment, seg_b: Segment) -> bool {
    if is_degenerate(&seg_a) || is_degenerate(&seg_b) {
        return false;
    }

    let (a1, a2) = seg_a;
    let (b1, b2) = seg_b;

    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    // General case: each segment straddles the other's supporting line
    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear cases: an endpoint lies on the other segment
    (o1 == 0 && on_segment(a1, b1, a2))
        || (o2 == 0 && on_segment(a1, b2, a2))
        || (o3 == 0 && on_segment(b1, a1, b2))
        || (o4 == 0 && on_segment(b1, a2, b2))
}

/// Which side of a directed line a point lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
    On,
}

/// Classifies `point` against the directed line `p1 → p2`.
///
/// Sign of the cross product of `(p2 - p1)` and `(point - p1)`: positive is
/// `Left`, negative is `Right`. Note that in image coordinates (y grows
/// downward) "left" is mirrored relative to the screen.
pub fn side_of(point: Point, line: Segment) -> Side {
    let value = cross(line.0, line.1, point);
    if value > 0.0 {
        Side::Left
    } else if value < 0.0 {
        Side::Right
    } else {
        Side::On
    }
}

// ============================================================================
// FINISH LINE
// ============================================================================

/// The operator-drawn timing line. Always non-degenerate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishLine {
    p1: Point,
    p2: Point,
}

impl FinishLine {
    /// Creates a finish line, rejecting equal or non-finite endpoints.
    pub fn new(p1: Point, p2: Point) -> Result<Self, ConfigError> {
        if !p1.is_finite() || !p2.is_finite() {
            return Err(ConfigError::NonFiniteLine);
        }
        if p1 == p2 {
            return Err(ConfigError::DegenerateLine { x: p1.x, y: p1.y });
        }
        Ok(Self { p1, p2 })
    }

    pub fn p1(&self) -> Point {
        self.p1
    }

    pub fn p2(&self) -> Point {
        self.p2
    }

    /// The line as a directed segment.
    pub fn segment(&self) -> Segment {
        (self.p1, self.p2)
    }

    /// True if the motion `prev → cur` touches or crosses the line.
    pub fn crossed(&self, prev: Point, cur: Point) -> bool {
        intersects((prev, cur), self.segment())
    }

    /// Side of the line a point lies on.
    pub fn side(&self, point: Point) -> Side {
        side_of(point, self.segment())
    }

    /// Segment length in pixels.
    pub fn length(&self) -> f64 {
        (vec2(self.p2) - vec2(self.p1)).norm()
    }
}

/// Two-click entry of a finish line.
///
/// The first click places P1; every later click (re)places P2 so the
/// operator can adjust the far end until the line is confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineDraft {
    p1: Option<Point>,
    p2: Option<Point>,
}

impl LineDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a click.
    pub fn click(&mut self, point: Point) {
        if self.p1.is_none() {
            self.p1 = Some(point);
        } else {
            self.p2 = Some(point);
        }
    }

    /// True once both endpoints have been placed.
    pub fn is_ready(&self) -> bool {
        self.p1.is_some() && self.p2.is_some()
    }

    /// Returns the endpoints placed so far.
    pub fn points(&self) -> (Option<Point>, Option<Point>) {
        (self.p1, self.p2)
    }

    /// Validates the draft into a line. `None` until both points are placed.
    pub fn finish(&self) -> Option<Result<FinishLine, ConfigError>> {
        match (self.p1, self.p2) {
            (Some(p1), Some(p2)) => Some(FinishLine::new(p1, p2)),
            _ => None,
        }
    }

    /// Forgets both points.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// TESTS
// ============================================================================
