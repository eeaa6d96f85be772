//! Wire types exchanged between the detector, the core and the renderer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in frame-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Creates a point from pixel coordinates.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True if neither coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Stable identifier for a tracked entity.
///
/// The detector's class label (e.g. `"blue-car"`) is the identity; no
/// tracking-by-appearance happens downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Creates an id from any string-like label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for EntityId {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single detector hit: the centroid of one bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label reported by the detector
    pub label: EntityId,

    /// Bounding-box centroid in pixels
    pub position: Point,

    /// Detector confidence [0.0 - 1.0]
    pub confidence: f64,
}

impl Detection {
    pub fn new(label: impl Into<EntityId>, position: Point, confidence: f64) -> Self {
        Self {
            label: label.into(),
            position,
            confidence,
        }
    }
}

/// All detections produced for one video frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionFrame {
    /// Capture time in seconds
    pub timestamp: f64,

    /// Zero or more detections (may contain several hits for one label)
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    /// Creates an empty frame at the given time.
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            detections: Vec::new(),
        }
    }

    /// Appends a detection, builder style.
    pub fn with(mut self, detection: Detection) -> Self {
        self.detections.push(detection);
        self
    }

    /// Returns the number of detections in the frame.
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// True if the detector saw nothing in this frame.
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
