//! The "RACE" State Machine - Phases, Laps, Penalties
//!
//! Orchestrates every entity track across frames:
//!
//! ```text
//!                 set_finish_line            start / start_at
//!  AwaitingLine ─────────────────► Armed ─────────────────────► Running
//!        ▲                           ▲                              │
//!        └──── reset (no line) ──────┴──────── reset ───────────────┘
//! ```
//!
//! While `Running`, each `update` feeds one sample into the entity's track,
//! runs the crossing detector and, on a crossing that closes a lap, appends
//! the lap together with its penalty and the best-lap update. A lap is either
//! fully recorded or not at all.

use crate::config::{ConfigError, RaceConfig};
use crate::crossing::{CrossingDecision, CrossingDetector, CrossingEvent};
use crate::entity_track::{DropReason, EntityTrack, PushOutcome, Sample};
use crate::geometry::FinishLine;
use finishline_env::{EntityId, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// PHASE
// ============================================================================

/// Lifecycle phase of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RacePhase {
    /// No finish line yet
    AwaitingLine,
    /// Line set, clock not started
    Armed,
    /// Crossings are being timed
    Running,
}

impl fmt::Display for RacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RacePhase::AwaitingLine => "awaiting_line",
            RacePhase::Armed => "armed",
            RacePhase::Running => "running",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LAP
// ============================================================================

/// A completed lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub entity_id: EntityId,

    /// 1-based, sequential per entity
    pub lap_index: u32,

    /// Seconds since the previous crossing (or race start for lap 1)
    pub duration: f64,

    /// Penalty seconds charged to this lap when it was recorded
    pub penalty_seconds: f64,

    /// Timestamp of the crossing that closed the lap
    pub completed_at: f64,
}

impl Lap {
    /// Duration plus penalty; the figure laps are ranked by.
    pub fn adjusted_time(&self) -> f64 {
        self.duration + self.penalty_seconds
    }
}

// ============================================================================
// PER-ENTITY RECORD
// ============================================================================

#[derive(Debug, Clone)]
struct EntityRecord {
    track: EntityTrack,
    laps: Vec<Lap>,
    pending_penalty: f64,
    /// Index into `laps` of the lowest adjusted time
    best_lap: Option<usize>,
    last_seen: Option<f64>,
    penalty_flash_until: Option<f64>,
}

impl EntityRecord {
    fn new(entity_id: EntityId, config: &RaceConfig) -> Self {
        Self {
            track: EntityTrack::new(entity_id, config.history_capacity)
                .with_max_gap(config.max_sample_gap_seconds),
            laps: Vec::new(),
            pending_penalty: 0.0,
            best_lap: None,
            last_seen: None,
            penalty_flash_until: None,
        }
    }

    fn best(&self) -> Option<&Lap> {
        self.best_lap.and_then(|i| self.laps.get(i))
    }

    fn clear(&mut self) {
        self.track.clear();
        self.laps.clear();
        self.pending_penalty = 0.0;
        self.best_lap = None;
        self.last_seen = None;
        self.penalty_flash_until = None;
    }
}

// ============================================================================
// UPDATE OUTCOME
// ============================================================================

/// What a single `update` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Sample discarded (out of order, duplicate or non-finite)
    Dropped(DropReason),
    /// Sample stored, no crossing this frame
    Tracked(CrossingDecision),
    /// First crossing for the entity: its lap clock starts now
    LapStarted { entity_id: EntityId, at: f64 },
    /// A lap was recorded
    LapCompleted { lap: Lap, new_best: bool },
}

impl UpdateOutcome {
    /// The recorded lap, if any.
    pub fn lap(&self) -> Option<&Lap> {
        match self {
            UpdateOutcome::LapCompleted { lap, .. } => Some(lap),
            _ => None,
        }
    }

    /// True for both lap starts and lap completions.
    pub fn is_crossing(&self) -> bool {
        matches!(self, UpdateOutcome::LapStarted { .. } | UpdateOutcome::LapCompleted { .. })
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Owned, read-only view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,

    /// Name for display; the label unless a session roster says otherwise
    pub display_name: String,

    pub laps: Vec<Lap>,

    /// Seconds since the last crossing (or race start), if the lap clock runs
    pub current_lap_elapsed: Option<f64>,

    /// Penalty waiting to be charged to the next lap
    pub pending_penalty: f64,

    pub best_lap: Option<Lap>,

    pub last_seen: Option<f64>,

    /// Seen within the visibility timeout
    pub visible: bool,

    /// A penalty was applied within the flash window
    pub penalty_flash: bool,
}

impl EntitySnapshot {
    pub fn lap_count(&self) -> usize {
        self.laps.len()
    }

    /// In-progress time including the pending penalty, as a HUD shows it.
    pub fn current_lap_adjusted(&self) -> Option<f64> {
        self.current_lap_elapsed.map(|t| t + self.pending_penalty)
    }
}

/// Owned, read-only view of the whole race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSnapshot {
    pub session_id: Uuid,
    pub phase: RacePhase,
    pub finish_line: Option<FinishLine>,
    pub race_start: Option<f64>,

    /// Time the snapshot describes
    pub taken_at: f64,

    /// Ordered by entity id
    pub entities: Vec<EntitySnapshot>,
}

impl RaceSnapshot {
    pub fn entity(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| &e.entity_id == id)
    }

    pub fn total_laps(&self) -> usize {
        self.entities.iter().map(|e| e.laps.len()).sum()
    }
}

// ============================================================================
// RACE STATE
// ============================================================================

/// The race state machine. Exclusively owns every track and lap.
#[derive(Debug, Clone)]
pub struct RaceState {
    session_id: Uuid,
    config: RaceConfig,
    detector: CrossingDetector,
    phase: RacePhase,
    finish_line: Option<FinishLine>,
    /// Predefined start time (standing start); lap 1 is measured from it
    race_start: Option<f64>,
    entities: BTreeMap<EntityId, EntityRecord>,
    /// Latest time observed through samples or `advance_clock`
    clock: f64,
}

impl RaceState {
    /// Creates a race in `AwaitingLine`, validating the configuration.
    pub fn new(config: RaceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates a race with the default configuration.
    pub fn with_defaults() -> Self {
        Self::build(RaceConfig::default())
    }

    fn build(config: RaceConfig) -> Self {
        let detector = CrossingDetector::new(
            config.min_history_length,
            config.lap_cooldown_seconds,
            config.direction,
        );
        Self {
            session_id: Uuid::new_v4(),
            config,
            detector,
            phase: RacePhase::AwaitingLine,
            finish_line: None,
            race_start: None,
            entities: BTreeMap::new(),
            clock: 0.0,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn finish_line(&self) -> Option<&FinishLine> {
        self.finish_line.as_ref()
    }

    pub fn race_start(&self) -> Option<f64> {
        self.race_start
    }

    /// Latest time the state has observed.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    pub fn track(&self, id: &EntityId) -> Option<&EntityTrack> {
        self.entities.get(id).map(|r| &r.track)
    }

    /// Recorded laps for an entity (empty if never seen).
    pub fn laps(&self, id: &EntityId) -> &[Lap] {
        self.entities.get(id).map(|r| r.laps.as_slice()).unwrap_or(&[])
    }

    pub fn best_lap(&self, id: &EntityId) -> Option<&Lap> {
        self.entities.get(id).and_then(|r| r.best())
    }

    pub fn pending_penalty(&self, id: &EntityId) -> f64 {
        self.entities.get(id).map(|r| r.pending_penalty).unwrap_or(0.0)
    }

    pub fn total_laps(&self) -> usize {
        self.entities.values().map(|r| r.laps.len()).sum()
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Sets (or moves) the finish line.
    ///
    /// Refused while running once any lap has been recorded, since moving the
    /// line mid-race would make recorded and future laps incomparable.
    pub fn set_finish_line(&mut self, p1: Point, p2: Point) -> Result<(), RaceError> {
        let line = FinishLine::new(p1, p2)?;

        if self.phase == RacePhase::Running {
            let laps = self.total_laps();
            if laps > 0 {
                return Err(RaceError::LineLocked { laps });
            }
        }

        self.finish_line = Some(line);
        if self.phase == RacePhase::AwaitingLine {
            self.phase = RacePhase::Armed;
        }
        info!(
            "Finish line set: ({:.0}, {:.0}) -> ({:.0}, {:.0})",
            p1.x, p1.y, p2.x, p2.y
        );
        Ok(())
    }

    /// Starts the race with a rolling start: each entity's first crossing
    /// starts its own lap clock.
    pub fn start(&mut self) -> Result<(), RaceError> {
        self.ensure_armed()?;
        self.phase = RacePhase::Running;
        self.race_start = None;
        info!("Race started (rolling start)");
        Ok(())
    }

    /// Starts the race with a standing start at `timestamp`: lap 1 of every
    /// entity is measured from it.
    pub fn start_at(&mut self, timestamp: f64) -> Result<(), RaceError> {
        if !timestamp.is_finite() {
            return Err(RaceError::InvalidTimestamp(timestamp));
        }
        self.ensure_armed()?;
        self.phase = RacePhase::Running;
        self.race_start = Some(timestamp);
        self.advance_clock(timestamp);
        info!("Race started at t={:.2}s", timestamp);
        Ok(())
    }

    fn ensure_armed(&self) -> Result<(), RaceError> {
        if self.phase != RacePhase::Armed {
            return Err(RaceError::NotArmed { phase: self.phase });
        }
        Ok(())
    }

    /// Clears every track, lap, pending penalty and best lap.
    ///
    /// The finish line survives, so the race returns to `Armed` (or stays in
    /// `AwaitingLine` if no line was ever set). Entities stay registered with
    /// empty records.
    pub fn reset(&mut self) {
        for record in self.entities.values_mut() {
            record.clear();
        }
        self.race_start = None;
        self.phase = if self.finish_line.is_some() {
            RacePhase::Armed
        } else {
            RacePhase::AwaitingLine
        };
        info!("Race reset ({})", self.phase);
    }

    /// Registers an entity ahead of its first detection.
    pub fn register(&mut self, id: EntityId) {
        let config = &self.config;
        self.entities
            .entry(id.clone())
            .or_insert_with(|| EntityRecord::new(id, config));
    }

    /// Moves the observed clock forward. Earlier times are ignored.
    pub fn advance_clock(&mut self, now: f64) {
        if now.is_finite() && now > self.clock {
            self.clock = now;
        }
    }

    // ========================================================================
    // PER-FRAME UPDATE
    // ========================================================================

    /// Feeds one observation of one entity.
    pub fn update(
        &mut self,
        entity_id: &EntityId,
        position: Point,
        timestamp: f64,
    ) -> Result<UpdateOutcome, RaceError> {
        if self.phase != RacePhase::Running {
            return Err(RaceError::NotRunning { phase: self.phase });
        }

        let config = &self.config;
        let record = self
            .entities
            .entry(entity_id.clone())
            .or_insert_with(|| EntityRecord::new(entity_id.clone(), config));

        match record.track.push(Sample::new(position, timestamp)) {
            PushOutcome::Rejected(reason) => {
                debug!("{} sample dropped at t={:.3}s: {:?}", entity_id, timestamp, reason);
                return Ok(UpdateOutcome::Dropped(reason));
            }
            PushOutcome::Restarted => {
                debug!("{} reacquired at t={:.3}s, history restarted", entity_id, timestamp);
            }
            PushOutcome::Accepted | PushOutcome::Evicted => {}
        }
        record.last_seen = Some(timestamp);
        if timestamp > self.clock {
            self.clock = timestamp;
        }

        let event = match self.detector.evaluate(&mut record.track, self.finish_line.as_ref()) {
            CrossingDecision::Crossed(event) => event,
            decision => {
                if let CrossingDecision::Debounced { since_last } = decision {
                    debug!("{} crossing debounced ({:.2}s since last)", entity_id, since_last);
                }
                return Ok(UpdateOutcome::Tracked(decision));
            }
        };

        Ok(Self::record_crossing(record, event, self.race_start))
    }

    /// Turns a crossing into a lap start or a lap, updating the record in one go.
    fn record_crossing(
        record: &mut EntityRecord,
        event: CrossingEvent,
        race_start: Option<f64>,
    ) -> UpdateOutcome {
        let reference = lap_reference(event.previous_crossing, race_start);
        let duration = reference.map(|start| event.timestamp - start);

        let duration = match duration {
            Some(d) if d > 0.0 => d,
            _ => {
                info!("🚦 {} START at t={:.2}s", event.entity_id, event.timestamp);
                return UpdateOutcome::LapStarted {
                    entity_id: event.entity_id,
                    at: event.timestamp,
                };
            }
        };

        let lap = Lap {
            entity_id: event.entity_id,
            lap_index: record.laps.len() as u32 + 1,
            duration,
            penalty_seconds: record.pending_penalty,
            completed_at: event.timestamp,
        };
        let new_best = record
            .best()
            .map_or(true, |best| lap.adjusted_time() < best.adjusted_time());

        record.laps.push(lap.clone());
        if new_best {
            record.best_lap = Some(record.laps.len() - 1);
        }
        record.pending_penalty = 0.0;

        info!(
            "🏁 {} LAP {}: {:.2}s (+{:.1}s){}",
            lap.entity_id,
            lap.lap_index,
            lap.duration,
            lap.penalty_seconds,
            if new_best { " BEST" } else { "" }
        );

        UpdateOutcome::LapCompleted { lap, new_best }
    }

    // ========================================================================
    // PENALTIES
    // ========================================================================

    /// Adds to an entity's pending penalty. It is charged to the entity's
    /// next recorded lap, never to laps already recorded.
    ///
    /// Returns the new pending total.
    pub fn apply_penalty(&mut self, entity_id: &EntityId, seconds: f64) -> Result<f64, RaceError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(RaceError::InvalidPenalty(seconds));
        }

        let flash_until = self.clock + self.config.penalty_flash_seconds;
        let config = &self.config;
        let record = self
            .entities
            .entry(entity_id.clone())
            .or_insert_with(|| EntityRecord::new(entity_id.clone(), config));

        record.pending_penalty += seconds;
        record.penalty_flash_until = Some(flash_until);

        warn!(
            "⚠️ {} PENALTY +{:.1}s (Total {:.1}s)",
            entity_id, seconds, record.pending_penalty
        );
        Ok(record.pending_penalty)
    }

    /// Takes seconds back off an entity's pending penalty, never below zero.
    ///
    /// Returns the new pending total.
    pub fn revert_penalty(&mut self, entity_id: &EntityId, seconds: f64) -> Result<f64, RaceError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(RaceError::InvalidPenalty(seconds));
        }

        let Some(record) = self.entities.get_mut(entity_id) else {
            return Ok(0.0);
        };
        record.pending_penalty = (record.pending_penalty - seconds).max(0.0);
        if record.pending_penalty == 0.0 {
            record.penalty_flash_until = None;
        }

        info!(
            "{} penalty reverted -{:.1}s (Total {:.1}s)",
            entity_id, seconds, record.pending_penalty
        );
        Ok(record.pending_penalty)
    }

    // ========================================================================
    // SNAPSHOT
    // ========================================================================

    /// Snapshot at the latest observed time.
    pub fn snapshot(&self) -> RaceSnapshot {
        self.snapshot_at(self.clock)
    }

    /// Snapshot describing the race at `now`.
    pub fn snapshot_at(&self, now: f64) -> RaceSnapshot {
        let timing = self.phase == RacePhase::Running;

        let entities = self
            .entities
            .iter()
            .map(|(id, record)| {
                let reference = lap_reference(record.track.last_crossing_time, self.race_start);
                let current_lap_elapsed = if timing {
                    reference.map(|t| (now - t).max(0.0))
                } else {
                    None
                };
                let visible = record
                    .last_seen
                    .is_some_and(|seen| now - seen < self.config.visibility_timeout_seconds);
                let penalty_flash = record.penalty_flash_until.is_some_and(|until| now < until);

                EntitySnapshot {
                    entity_id: id.clone(),
                    display_name: id.to_string(),
                    laps: record.laps.clone(),
                    current_lap_elapsed,
                    pending_penalty: record.pending_penalty,
                    best_lap: record.best().cloned(),
                    last_seen: record.last_seen,
                    visible,
                    penalty_flash,
                }
            })
            .collect();

        RaceSnapshot {
            session_id: self.session_id,
            phase: self.phase,
            finish_line: self.finish_line,
            race_start: self.race_start,
            taken_at: now,
            entities,
        }
    }
}

/// Start of the lap in progress: the last crossing, unless a standing start
/// came after it.
fn lap_reference(last_crossing: Option<f64>, race_start: Option<f64>) -> Option<f64> {
    match (last_crossing, race_start) {
        (Some(crossing), Some(start)) => Some(crossing.max(start)),
        (crossing, start) => crossing.or(start),
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Operations refused by the state machine. State is unchanged on error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RaceError {
    #[error("Race not armed (phase: {phase})")]
    NotArmed { phase: RacePhase },

    #[error("Race not running (phase: {phase})")]
    NotRunning { phase: RacePhase },

    #[error("Finish line locked: {laps} laps already recorded")]
    LineLocked { laps: usize },

    #[error("Penalty must be finite and non-negative, got {0}")]
    InvalidPenalty(f64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// TESTS
// ============================================================================
