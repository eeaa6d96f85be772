//! FinishLine Core - Lap Timing from Tracked Detections
//!
//! Turns per-frame object detections into lap times:
//! 1. **Geometry**: does the motion between two samples touch the finish line?
//! 2. **Crossing**: history guard and cooldown turn raw intersections into
//!    exactly one event per physical pass
//! 3. **Race**: a phase machine that records laps, penalties and best laps
//!
//! The core has no camera, window or wall clock. Time reaches it through
//! sample timestamps and the [`finishline_env::RaceContext`] of a session.

pub mod geometry;
pub mod config;
pub mod entity_track;
pub mod crossing;
pub mod race;
pub mod session;
pub mod shared;
pub mod export;

// Re-export key types for convenience
pub use config::{ConfigError, Entrant, RaceConfig, SessionConfig};
pub use crossing::{CrossingDecision, CrossingDetector, CrossingDirection, CrossingEvent};
pub use entity_track::{DropReason, EntityTrack, Sample};
pub use export::ExportError;
pub use geometry::{intersects, side_of, FinishLine, LineDraft, Side};
pub use race::{EntitySnapshot, Lap, RaceError, RacePhase, RaceSnapshot, RaceState, UpdateOutcome};
pub use session::{OperatorCommand, RaceSession};
pub use shared::SharedRace;
