//! Race Session - Binds the race state machine to a clock and a roster.
//!
//! The state machine only knows entity ids, positions and timestamps. A
//! session adds what a capture loop needs around it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       RaceSession                        │
//! │  Context: RaceContext   now() for snapshots              │
//! │                         system_time() for export names   │
//! │                                                          │
//! │  DetectionFrame ─► confidence / roster filter            │
//! │                 ─► best detection per label              │
//! │                 ─► RaceState::update                     │
//! │                                                          │
//! │  OperatorCommand ─► line clicks, start, penalties, reset │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Frames are expected to be stamped on the same clock the context reads.

use crate::config::{ConfigError, SessionConfig};
use crate::export::{self, ExportError};
use crate::geometry::LineDraft;
use crate::race::{RaceError, RacePhase, RaceSnapshot, RaceState, UpdateOutcome};
use finishline_env::{Detection, DetectionFrame, DetectionSource, EntityId, EnvError, Point, RaceContext};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Operator input, decoupled from whichever device produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Click on the frame; the first places P1, later ones (re)place P2
    ClickLine(Point),
    /// Start the race (rolling start)
    Start,
    /// Start the race with lap 1 measured from the given time
    StartAt(f64),
    /// Add one penalty increment to an entity
    Penalty(EntityId),
    /// Take one penalty increment back
    RevertPenalty(EntityId),
    /// Clear all timing, keeping the line
    Reset,
}

/// A capture session over one race.
pub struct RaceSession<Ctx: RaceContext> {
    /// Clock context
    context: Arc<Ctx>,

    config: SessionConfig,

    race: RaceState,

    /// Line being entered by clicks
    draft: LineDraft,
}

impl<Ctx: RaceContext> RaceSession<Ctx> {
    /// Creates a session and registers every roster entrant.
    pub fn new(context: Arc<Ctx>, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut race = RaceState::new(config.race.clone())?;
        for entrant in &config.roster {
            race.register(entrant.id.clone());
        }

        Ok(Self {
            context,
            config,
            race,
            draft: LineDraft::new(),
        })
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn race(&self) -> &RaceState {
        &self.race
    }

    pub fn race_mut(&mut self) -> &mut RaceState {
        &mut self.race
    }

    pub fn line_draft(&self) -> &LineDraft {
        &self.draft
    }

    pub fn phase(&self) -> RacePhase {
        self.race.phase()
    }

    // ========================================================================
    // DETECTIONS
    // ========================================================================

    /// Feeds one detector frame.
    ///
    /// Detections below the confidence threshold or outside the roster are
    /// ignored, and only the most confident detection per label is used.
    /// Frames arriving while the race is not running are ignored.
    pub fn ingest_frame(&mut self, frame: &DetectionFrame) -> Vec<UpdateOutcome> {
        self.race.advance_clock(frame.timestamp);
        if self.race.phase() != RacePhase::Running {
            return Vec::new();
        }

        let mut best: BTreeMap<&EntityId, &Detection> = BTreeMap::new();
        for detection in &frame.detections {
            let confident = detection.confidence >= self.config.confidence_threshold;
            if !confident || !self.config.accepts(&detection.label) {
                continue;
            }
            best.entry(&detection.label)
                .and_modify(|kept| {
                    if detection.confidence > kept.confidence {
                        *kept = detection;
                    }
                })
                .or_insert(detection);
        }

        let mut outcomes = Vec::with_capacity(best.len());
        for (label, detection) in best {
            match self.race.update(label, detection.position, frame.timestamp) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => debug!("Frame at t={:.3}s: {}", frame.timestamp, e),
            }
        }
        outcomes
    }

    /// Pulls frames from `source` until it is exhausted, ingesting each one.
    ///
    /// Returns the lap starts and lap completions in the order they happened.
    /// Never returns for an endless source.
    pub fn drive<S: DetectionSource>(&mut self, source: &mut S) -> Result<Vec<UpdateOutcome>, EnvError> {
        let mut crossings = Vec::new();
        while let Some(frame) = source.next_frame()? {
            crossings.extend(self.ingest_frame(&frame).into_iter().filter(UpdateOutcome::is_crossing));
        }
        Ok(crossings)
    }

    // ========================================================================
    // OPERATOR
    // ========================================================================

    /// Adds one penalty increment to `label`. Returns the pending total.
    pub fn penalize(&mut self, label: &EntityId) -> Result<f64, RaceError> {
        self.race.advance_clock(self.context.now());
        let increment = self.config.race.penalty_increment_seconds;
        self.race.apply_penalty(label, increment)
    }

    /// Takes one penalty increment back from `label`. Returns the pending total.
    pub fn revert_penalty(&mut self, label: &EntityId) -> Result<f64, RaceError> {
        let increment = self.config.race.penalty_increment_seconds;
        self.race.revert_penalty(label, increment)
    }

    /// Applies an operator command to the race.
    pub fn handle(&mut self, command: OperatorCommand) -> Result<(), RaceError> {
        match command {
            OperatorCommand::ClickLine(point) => {
                self.draft.click(point);
                if let (Some(p1), Some(p2)) = self.draft.points() {
                    self.race.set_finish_line(p1, p2)?;
                }
                Ok(())
            }
            OperatorCommand::Start => self.race.start(),
            OperatorCommand::StartAt(t) => self.race.start_at(t),
            OperatorCommand::Penalty(label) => self.penalize(&label).map(|_| ()),
            OperatorCommand::RevertPenalty(label) => self.revert_penalty(&label).map(|_| ()),
            OperatorCommand::Reset => {
                self.race.reset();
                Ok(())
            }
        }
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    /// Snapshot at the context's current time, with roster display names.
    pub fn snapshot(&self) -> RaceSnapshot {
        let now = self.context.now().max(self.race.clock());
        let mut snapshot = self.race.snapshot_at(now);
        for entity in &mut snapshot.entities {
            entity.display_name = self.config.display_name(&entity.entity_id);
        }
        snapshot
    }

    /// Writes one lap table per entity with laps into `dir`, suffixed with
    /// the current unix time in seconds.
    pub fn export_csv(&self, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
        let suffix = self
            .context
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        export::write_lap_tables(dir, &self.snapshot(), &suffix.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Entrant;
    use approx::assert_relative_eq;
    use finishline_env::{ReplaySource, SystemClock};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    /// Hand-driven clock.
    struct ManualClock {
        now: Mutex<f64>,
    }

    impl ManualClock {
        fn shared() -> Arc<Self> {
            Arc::new(Self { now: Mutex::new(0.0) })
        }

        fn set(&self, t: f64) {
            *self.now.lock().unwrap() = t;
        }
    }

    impl RaceContext for ManualClock {
        fn now(&self) -> f64 {
            *self.now.lock().unwrap()
        }

        fn system_time(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        }
    }

    fn blue() -> EntityId {
        EntityId::from("blue-car")
    }

    fn running_session() -> (Arc<ManualClock>, RaceSession<ManualClock>) {
        let clock = ManualClock::shared();
        let mut session = RaceSession::new(clock.clone(), SessionConfig::default()).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(0.0, 100.0))).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(640.0, 100.0))).unwrap();
        session.handle(OperatorCommand::Start).unwrap();
        (clock, session)
    }

    fn frame(t: f64, detections: Vec<Detection>) -> DetectionFrame {
        DetectionFrame {
            timestamp: t,
            detections,
        }
    }

    fn pass(session: &mut RaceSession<ManualClock>, t: f64) -> Vec<UpdateOutcome> {
        session.ingest_frame(&frame(t, vec![Detection::new("blue-car", Point::new(100.0, 90.0), 0.9)]));
        session.ingest_frame(&frame(t + 0.1, vec![Detection::new("blue-car", Point::new(100.0, 110.0), 0.9)]))
    }

    #[test]
    fn test_roster_registered() {
        let session = RaceSession::new(ManualClock::shared(), SessionConfig::default()).unwrap();
        assert_eq!(session.race().entity_count(), 2);
        assert_eq!(session.phase(), RacePhase::AwaitingLine);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig {
            confidence_threshold: 2.0,
            ..Default::default()
        };
        assert!(RaceSession::new(ManualClock::shared(), config).is_err());
    }

    #[test]
    fn test_two_clicks_arm_the_race() {
        let mut session = RaceSession::new(ManualClock::shared(), SessionConfig::default()).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(0.0, 100.0))).unwrap();
        assert_eq!(session.phase(), RacePhase::AwaitingLine);

        session.handle(OperatorCommand::ClickLine(Point::new(640.0, 100.0))).unwrap();
        assert_eq!(session.phase(), RacePhase::Armed);
        assert_eq!(session.race().finish_line().unwrap().p2(), Point::new(640.0, 100.0));
    }

    #[test]
    fn test_frames_ignored_until_running() {
        let mut session = RaceSession::new(ManualClock::shared(), SessionConfig::default()).unwrap();
        let outcomes = session.ingest_frame(&frame(0.0, vec![Detection::new("blue-car", Point::new(1.0, 1.0), 0.9)]));
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_low_confidence_and_unknown_labels_filtered() {
        let (_, mut session) = running_session();
        let outcomes = session.ingest_frame(&frame(
            0.0,
            vec![
                Detection::new("blue-car", Point::new(100.0, 90.0), 0.3),
                Detection::new("red-car", Point::new(100.0, 90.0), 0.99),
            ],
        ));
        assert!(outcomes.is_empty());
        assert!(session.race().track(&blue()).unwrap().is_empty());
    }

    #[test]
    fn test_best_detection_per_label() {
        let (_, mut session) = running_session();
        let outcomes = session.ingest_frame(&frame(
            0.0,
            vec![
                Detection::new("blue-car", Point::new(10.0, 10.0), 0.6),
                Detection::new("blue-car", Point::new(100.0, 90.0), 0.95),
                Detection::new("green-car", Point::new(300.0, 50.0), 0.7),
            ],
        ));
        assert_eq!(outcomes.len(), 2);

        let latest = session.race().track(&blue()).unwrap().latest().unwrap();
        assert_eq!(latest.point, Point::new(100.0, 90.0));
    }

    #[test]
    fn test_lap_with_penalty_through_session() {
        let (clock, mut session) = running_session();

        pass(&mut session, 0.0);
        clock.set(2.0);
        session.handle(OperatorCommand::Penalty(blue())).unwrap();
        session.handle(OperatorCommand::Penalty(blue())).unwrap();
        session.handle(OperatorCommand::RevertPenalty(blue())).unwrap();

        let outcomes = pass(&mut session, 5.1);
        let lap = outcomes.iter().find_map(|o| o.lap()).unwrap();
        assert_relative_eq!(lap.duration, 5.1, epsilon = 1e-9);
        assert_eq!(lap.penalty_seconds, 2.0);
    }

    #[test]
    fn test_snapshot_uses_display_names_and_context_time() {
        let (clock, mut session) = running_session();
        pass(&mut session, 0.0);
        clock.set(1.0);

        let snapshot = session.snapshot();
        let blue = snapshot.entity(&blue()).unwrap();
        assert_eq!(blue.display_name, "Blue Car");
        assert_relative_eq!(blue.current_lap_elapsed.unwrap(), 0.9, epsilon = 1e-9);
        assert_eq!(snapshot.taken_at, 1.0);
    }

    #[test]
    fn test_open_roster_accepts_any_label() {
        let clock = ManualClock::shared();
        let config = SessionConfig {
            roster: Vec::new(),
            ..Default::default()
        };
        let mut session = RaceSession::new(clock, config).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(0.0, 100.0))).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(640.0, 100.0))).unwrap();
        session.handle(OperatorCommand::Start).unwrap();

        let outcomes = session.ingest_frame(&frame(0.0, vec![Detection::new("truck", Point::new(1.0, 1.0), 0.9)]));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(session.snapshot().entity(&EntityId::from("truck")).unwrap().display_name, "truck");
    }

    #[test]
    fn test_reset_command() {
        let (_, mut session) = running_session();
        pass(&mut session, 0.0);
        pass(&mut session, 5.0);
        assert_eq!(session.race().total_laps(), 1);

        session.handle(OperatorCommand::Reset).unwrap();
        assert_eq!(session.phase(), RacePhase::Armed);
        assert_eq!(session.race().total_laps(), 0);
    }

    #[test]
    fn test_export_csv_names() {
        let config = SessionConfig {
            roster: vec![Entrant::new("blue-car", "Blue Car")],
            ..Default::default()
        };
        let mut session = RaceSession::new(ManualClock::shared(), config).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(0.0, 100.0))).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(640.0, 100.0))).unwrap();
        session.handle(OperatorCommand::Start).unwrap();
        pass(&mut session, 0.0);
        pass(&mut session, 5.0);

        let dir = std::env::temp_dir().join(format!("finishline-session-{}", uuid::Uuid::new_v4()));
        let written = session.export_csv(&dir).unwrap();
        assert_eq!(written, vec![dir.join("Blue_Car_1700000000.csv")]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn replay_pass(t: f64) -> [DetectionFrame; 2] {
        [
            frame(t, vec![Detection::new("blue-car", Point::new(100.0, 90.0), 0.9)]),
            frame(t + 0.1, vec![Detection::new("blue-car", Point::new(100.0, 110.0), 0.9)]),
        ]
    }

    #[test]
    fn test_drive_replays_recorded_frames() {
        let mut session = RaceSession::new(SystemClock::shared(), SessionConfig::default()).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(0.0, 100.0))).unwrap();
        session.handle(OperatorCommand::ClickLine(Point::new(640.0, 100.0))).unwrap();
        session.handle(OperatorCommand::Start).unwrap();

        let mut source = ReplaySource::new(replay_pass(0.0).into_iter().chain(replay_pass(5.0)));
        let crossings = session.drive(&mut source).unwrap();

        assert_eq!(crossings.len(), 2);
        assert!(matches!(crossings[0], UpdateOutcome::LapStarted { .. }));
        assert_relative_eq!(crossings[1].lap().unwrap().duration, 5.0, epsilon = 1e-9);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_drive_stops_on_source_error() {
        let (_, mut session) = running_session();
        let mut source = ReplaySource::new(replay_pass(5.0).into_iter().chain(replay_pass(0.0)));

        assert!(session.drive(&mut source).is_err());
        assert_eq!(session.race().track(&blue()).unwrap().len(), 2);
    }
}
