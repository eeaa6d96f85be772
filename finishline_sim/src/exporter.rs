//! JSON exporter for offline replay of a simulated race.
//!
//! Exports ground truth, detections and lap events frame by frame, plus the
//! final race snapshot.

use finishline_core::{ConfigError, OperatorCommand, RaceError, RaceSession, RaceSnapshot, SessionConfig};
use finishline_env::{Detection, DetectionFrame, EntityId, EnvError, Point, ReplaySource, SystemClock};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth car positions
    pub ground_truth: Vec<CarPosition>,

    /// What the detector reported
    pub detections: Vec<CarPosition>,

    /// Events (lap starts, laps, penalties, resets)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    pub fn new(time_sec: f64, ground_truth: Vec<(EntityId, Point)>, frame: &DetectionFrame) -> Self {
        Self {
            time_sec,
            ground_truth: ground_truth
                .into_iter()
                .map(|(id, p)| CarPosition::new(id.as_str(), p, None))
                .collect(),
            detections: frame
                .detections
                .iter()
                .map(|d| CarPosition::new(d.label.as_str(), d.position, Some(d.confidence)))
                .collect(),
            events: Vec::new(),
        }
    }

    /// Rebuilds the detector output recorded in this frame.
    pub fn detection_frame(&self) -> DetectionFrame {
        DetectionFrame {
            timestamp: self.time_sec,
            detections: self
                .detections
                .iter()
                .map(|d| Detection::new(d.label.as_str(), Point::new(d.x, d.y), d.confidence.unwrap_or(1.0)))
                .collect(),
        }
    }
}

/// Position of a car.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarPosition {
    pub label: String,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl CarPosition {
    pub fn new(label: &str, p: Point, confidence: Option<f64>) -> Self {
        Self {
            label: label.to_string(),
            x: p.x,
            y: p.y,
            confidence,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_line: Option<(Point, Point)>,

    /// Recorded frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_snapshot: Option<RaceSnapshot>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            finish_line: None,
            frames: Vec::new(),
            passed: false,
            final_snapshot: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, snapshot: RaceSnapshot) {
        self.passed = passed;
        self.final_snapshot = Some(snapshot);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Reads an export written by [`SimExport::write_to_file`].
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// The recorded detections as a replayable source.
    pub fn replay_source(&self) -> ReplaySource {
        ReplaySource::new(self.frames.iter().map(SimFrame::detection_frame))
    }

    /// Re-times the recorded detections with a fresh session on the wall
    /// clock: the line is drawn from the export and the race rolling-started.
    ///
    /// Operator commands issued during the original run are not replayed.
    pub fn replay(&self, config: SessionConfig) -> Result<RaceSession<SystemClock>, ReplayError> {
        let (p1, p2) = self.finish_line.ok_or(ReplayError::MissingLine)?;

        let mut session = RaceSession::new(SystemClock::shared(), config)?;
        session.handle(OperatorCommand::ClickLine(p1))?;
        session.handle(OperatorCommand::ClickLine(p2))?;
        session.handle(OperatorCommand::Start)?;

        let crossings = session.drive(&mut self.replay_source())?;
        tracing::info!(
            "Replayed {} frames of {}: {} crossings",
            self.frames.len(),
            self.scenario,
            crossings.len()
        );
        Ok(session)
    }
}

/// Replay failures.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Export has no finish line")]
    MissingLine,

    #[error("Invalid session config: {0}")]
    Config(#[from] ConfigError),

    #[error("Race refused: {0}")]
    Race(#[from] RaceError),

    #[error("Recorded frames unusable: {0}")]
    Source(#[from] EnvError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_frame_conversion() {
        let frame = DetectionFrame::new(1.5).with(Detection::new("blue-car", Point::new(10.0, 20.0), 0.9));
        let sim_frame = SimFrame::new(1.5, vec![(EntityId::from("blue-car"), Point::new(11.0, 21.0))], &frame);

        assert_eq!(sim_frame.ground_truth.len(), 1);
        assert_eq!(sim_frame.detections[0].confidence, Some(0.9));
    }

    #[test]
    fn test_events_skipped_when_empty() {
        let frame = SimFrame::new(0.0, Vec::new(), &DetectionFrame::new(0.0));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("events"));
    }

    #[test]
    fn test_add_frame_tracks_duration() {
        let mut export = SimExport::new("clean_laps", 42);
        export.add_frame(SimFrame::new(2.5, Vec::new(), &DetectionFrame::new(2.5)));
        assert_eq!(export.duration_sec, 2.5);
        assert_eq!(export.frames.len(), 1);
    }

    #[test]
    fn test_detection_frame_rebuilt() {
        let frame = DetectionFrame::new(1.5).with(Detection::new("blue-car", Point::new(10.0, 20.0), 0.9));
        let sim_frame = SimFrame::new(1.5, Vec::new(), &frame);
        assert_eq!(sim_frame.detection_frame(), frame);
    }

    #[test]
    fn test_replay_reproduces_laps() {
        let (result, export) = ScenarioRunner::new(42)
            .with_duration(20.0)
            .with_export_interval(1)
            .run_with_export(ScenarioId::CleanLaps);
        assert!(result.passed);

        let session = export.replay(SessionConfig::default()).unwrap();
        let replayed = session.snapshot();
        for entity in &result.snapshot.entities {
            let again = replayed.entity(&entity.entity_id).unwrap();
            assert!(!entity.laps.is_empty());
            assert_eq!(again.laps, entity.laps);
        }
    }

    #[test]
    fn test_replay_requires_line() {
        let export = SimExport::new("clean_laps", 1);
        assert!(matches!(
            export.replay(SessionConfig::default()),
            Err(ReplayError::MissingLine)
        ));
    }

    #[test]
    fn test_read_back_from_file() {
        let mut export = SimExport::new("clean_laps", 7);
        export.finish_line = Some((Point::new(320.0, 340.0), Point::new(320.0, 440.0)));
        let frame = DetectionFrame::new(0.5).with(Detection::new("blue-car", Point::new(1.0, 2.0), 0.8));
        export.add_frame(SimFrame::new(0.5, Vec::new(), &frame));

        let path = std::env::temp_dir().join(format!("finishline-export-{}-{}.json", std::process::id(), export.seed));
        export.write_to_file(path.to_str().unwrap()).unwrap();
        let loaded = SimExport::read_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.finish_line, export.finish_line);
        assert_eq!(loaded.frames[0].detection_frame(), frame);
    }
}
