//! Scenario runner - drives a race session with oracle detections and judges
//! the recorded laps against ground truth.

use crate::context::SimClock;
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::oracle::{Circuit, Oracle};
use crate::scenarios::ScenarioId;

use finishline_core::{
    CrossingDecision, CrossingDirection, OperatorCommand, RaceSession, RaceSnapshot, SessionConfig,
    UpdateOutcome,
};
use finishline_env::{DetectionSource, EntityId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Laps near the edges of the run may legitimately go either way.
const EDGE_MARGIN_SECS: f64 = 0.5;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Simulation parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Master seed; the oracle seed is derived from it
    pub seed: u64,

    /// Camera frame rate (default: 30)
    pub fps: u32,

    /// Simulated duration in seconds (default: 30)
    pub duration_secs: f64,

    /// Centroid noise in pixels (default: 0)
    pub noise_std: f64,

    /// Per car, per frame probability of a missed detection (default: 0)
    pub dropout_probability: f64,

    /// Per frame probability of spurious detections (default: 0)
    pub clutter_probability: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            fps: 30,
            duration_secs: 30.0,
            noise_std: 0.0,
            dropout_probability: 0.0,
            clutter_probability: 0.0,
        }
    }
}

impl SimConfig {
    /// Seconds between frames.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }

    pub fn total_frames(&self) -> u64 {
        (self.duration_secs.max(0.0) * self.fps as f64).round() as u64
    }

    /// Oracle seed, kept apart from the setup seed so changing the car
    /// layout does not change the detector noise.
    pub fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    /// An oracle with this configuration's detector model and no cars.
    pub fn oracle(&self) -> Oracle {
        let mut oracle = Oracle::new(self.physics_seed(), Circuit::default());
        oracle.set_position_noise(self.noise_std);
        oracle.set_dropout_probability(self.dropout_probability);
        oracle.set_clutter_probability(self.clutter_probability);
        oracle.set_frame_interval(self.frame_interval());
        oracle
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames fed to the session
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Laps recorded across all cars
    pub laps_recorded: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Counters collected during the run
    pub metrics: ScenarioMetrics,

    /// Final race state
    pub snapshot: RaceSnapshot,
}

/// Counters collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMetrics {
    /// Detections produced by the oracle
    pub detections: u64,

    /// Samples rejected by the tracks
    pub dropped_samples: u64,

    /// Crossings suppressed by the cooldown
    pub debounced: u64,

    /// Crossings rejected by the direction policy
    pub wrong_direction: u64,

    pub lap_starts: u64,

    pub laps: u64,
}

impl ScenarioMetrics {
    /// Counts one update outcome.
    pub fn record(&mut self, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Dropped(_) => self.dropped_samples += 1,
            UpdateOutcome::Tracked(CrossingDecision::Debounced { .. }) => self.debounced += 1,
            UpdateOutcome::Tracked(CrossingDecision::WrongDirection { .. }) => self.wrong_direction += 1,
            UpdateOutcome::Tracked(_) => {}
            UpdateOutcome::LapStarted { .. } => self.lap_starts += 1,
            UpdateOutcome::LapCompleted { .. } => self.laps += 1,
        }
    }
}

// ============================================================================
// SCENARIO PLANS
// ============================================================================

/// One car in a scenario.
#[derive(Debug, Clone)]
struct CarPlan {
    label: &'static str,
    lap_seconds: f64,
    first_crossing_in: f64,
    reversed: bool,
    /// Stop on the line on this pass, for this long
    dwell: Option<(u32, f64)>,
}

/// Everything that differs between scenarios.
#[derive(Debug, Clone)]
struct Plan {
    sim: SimConfig,
    session: SessionConfig,
    cars: Vec<CarPlan>,
    /// Operator commands, in time order
    actions: Vec<(f64, OperatorCommand)>,
    /// Laps are expected only from crossings after this time
    counted_from: f64,
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs race scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frame rate in Hz
    fps: u32,

    /// Duration in seconds
    duration_secs: f64,

    /// Record every n-th frame when exporting
    export_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fps: 30,
            duration_secs: 30.0,
            export_interval: 3,
        }
    }

    /// Sets the frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Sets how often frames are recorded when exporting.
    pub fn with_export_interval(mut self, every_n_frames: u64) -> Self {
        self.export_interval = every_n_frames.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording frames for replay.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some(&mut export));
        export.finalize(result.passed, result.snapshot.clone());
        (result, export)
    }

    /// Base simulation settings for a scenario.
    pub fn sim_config(&self, scenario: ScenarioId) -> SimConfig {
        self.plan(scenario).sim
    }

    fn plan(&self, scenario: ScenarioId) -> Plan {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut car = |label: &'static str, base_lap: f64| CarPlan {
            label,
            lap_seconds: base_lap + rng.gen_range(-0.3..0.3),
            first_crossing_in: rng.gen_range(0.5..2.0),
            reversed: false,
            dwell: None,
        };
        let mut cars = vec![car("blue-car", 5.0), car("green-car", 6.0)];

        let mut sim = SimConfig {
            seed: self.seed,
            fps: self.fps,
            duration_secs: self.duration_secs,
            ..SimConfig::default()
        };
        let mut session = SessionConfig::default();
        let mut actions = Vec::new();
        let mut counted_from = 0.0;

        let blue = EntityId::from("blue-car");
        let green = EntityId::from("green-car");

        match scenario {
            ScenarioId::CleanLaps => {}
            ScenarioId::NoisyDetector => {
                sim.noise_std = 2.5;
                sim.clutter_probability = 0.3;
            }
            ScenarioId::Occlusion => {
                sim.noise_std = 1.0;
                sim.dropout_probability = 0.3;
            }
            ScenarioId::LineDwell => {
                sim.noise_std = 1.5;
                cars[0].dwell = Some((2, 1.5));
            }
            ScenarioId::Penalties => {
                actions.push((2.0, OperatorCommand::Penalty(blue.clone())));
                actions.push((2.0, OperatorCommand::Penalty(blue.clone())));
                actions.push((2.5, OperatorCommand::RevertPenalty(blue.clone())));
                actions.push((8.0, OperatorCommand::Penalty(green.clone())));
                actions.push((8.2, OperatorCommand::Penalty(green)));
                actions.push((14.0, OperatorCommand::Penalty(blue)));
            }
            ScenarioId::ResetMidRace => {
                let half = self.duration_secs / 2.0;
                actions.push((half, OperatorCommand::Reset));
                actions.push((half, OperatorCommand::Start));
                counted_from = half;
            }
            ScenarioId::WrongWay => {
                // Forward laps pass the line right-to-left of P1 → P2
                session.race.direction = CrossingDirection::RightToLeft;
                cars[1].reversed = true;
            }
        }

        Plan {
            sim,
            session,
            cars,
            actions,
            counted_from,
        }
    }

    fn execute(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let plan = self.plan(scenario);

        let mut oracle = plan.sim.oracle();
        for car in &plan.cars {
            let index = if car.reversed {
                oracle.spawn_reversed_car(car.label, car.lap_seconds, car.first_crossing_in)
            } else {
                oracle.spawn_car(car.label, car.lap_seconds, car.first_crossing_in)
            };
            if let Some((pass, seconds)) = car.dwell {
                oracle.set_dwell(index, pass, seconds);
            }
        }

        let clock = SimClock::shared();
        let mut session = match RaceSession::new(clock.clone(), plan.session.clone()) {
            Ok(session) => session,
            Err(e) => return self.setup_failure(scenario, format!("Invalid session config: {}", e)),
        };

        // Operator draws the line with two clicks, then starts the race
        let (p1, p2) = oracle.circuit().finish_line();
        if let Some(export) = export.as_deref_mut() {
            export.finish_line = Some((p1, p2));
        }
        let setup = [
            OperatorCommand::ClickLine(p1),
            OperatorCommand::ClickLine(p2),
            OperatorCommand::Start,
        ];
        for command in setup {
            if let Err(e) = session.handle(command) {
                return self.setup_failure(scenario, format!("Race setup refused: {}", e));
            }
        }

        let total_frames = plan.sim.total_frames();
        let mut metrics = ScenarioMetrics::default();
        let mut applied: BTreeMap<EntityId, f64> = BTreeMap::new();
        let mut actions = plan.actions.iter().peekable();
        let mut last_frame_time = 0.0;

        for frame_index in 0..total_frames {
            let now = oracle.time();
            clock.set_secs(now);
            let mut events = Vec::new();

            while let Some((_, command)) = actions.next_if(|(at, _)| *at <= now) {
                let label = match command {
                    OperatorCommand::Penalty(label) | OperatorCommand::RevertPenalty(label) => Some(label),
                    _ => None,
                };
                let before = label.map(|l| session.race().pending_penalty(l)).unwrap_or(0.0);

                match session.handle(command.clone()) {
                    Ok(()) => {
                        if let Some(label) = label {
                            let after = session.race().pending_penalty(label);
                            *applied.entry(label.clone()).or_insert(0.0) += after - before;
                        }
                        events.push(SimEvent::warn(format!("{:?}", command)));
                    }
                    Err(e) => warn!("Command {:?} refused: {}", command, e),
                }
            }

            let truth = oracle.ground_truth_positions();
            let frame = match oracle.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Detector stopped at t={:.2}s: {}", now, e);
                    break;
                }
            };
            metrics.detections += frame.len() as u64;

            for outcome in session.ingest_frame(&frame) {
                metrics.record(&outcome);
                match &outcome {
                    UpdateOutcome::LapStarted { entity_id, at } => {
                        events.push(SimEvent::info(format!("{} START at {:.2}s", entity_id, at)));
                    }
                    UpdateOutcome::LapCompleted { lap, new_best } => {
                        events.push(SimEvent::info(format!(
                            "{} LAP {}: {:.2}s (+{:.1}s){}",
                            lap.entity_id,
                            lap.lap_index,
                            lap.duration,
                            lap.penalty_seconds,
                            if *new_best { " BEST" } else { "" }
                        )));
                    }
                    _ => {}
                }
            }

            if let Some(export) = export.as_deref_mut() {
                if frame_index % self.export_interval == 0 || !events.is_empty() {
                    let mut sim_frame = SimFrame::new(now, truth, &frame);
                    sim_frame.events = events;
                    export.add_frame(sim_frame);
                }
            }

            if frame_index % plan.sim.fps as u64 == 0 {
                debug!(
                    "  t={:.1}s | laps={} | detections={}",
                    now,
                    session.race().total_laps(),
                    frame.len()
                );
            }

            last_frame_time = now;
        }

        let snapshot = session.snapshot();
        let cooldown = plan.session.race.lap_cooldown_seconds;

        let failure = check_invariants(&snapshot, cooldown)
            .and_then(|()| check_penalties(&snapshot, &applied))
            .and_then(|()| check_lap_counts(&snapshot, &oracle, &plan, last_frame_time))
            .and_then(|()| check_scenario(scenario, &snapshot, &metrics, plan.counted_from))
            .err();

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            total_frames,
            final_time_secs: last_frame_time,
            laps_recorded: snapshot.total_laps(),
            failure_reason: failure,
            metrics,
            snapshot,
        }
    }

    fn setup_failure(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        let snapshot = RaceSession::new(SimClock::shared(), SessionConfig::default())
            .map(|s| s.snapshot())
            .unwrap_or_else(|_| finishline_core::RaceState::with_defaults().snapshot());
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_frames: 0,
            final_time_secs: 0.0,
            laps_recorded: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            snapshot,
        }
    }
}

// ============================================================================
// CHECKS
// ============================================================================

/// Structural invariants every recorded race must satisfy.
pub fn check_invariants(snapshot: &RaceSnapshot, cooldown: f64) -> Result<(), String> {
    for entity in &snapshot.entities {
        let mut previous_completion = f64::NEG_INFINITY;

        for (i, lap) in entity.laps.iter().enumerate() {
            if lap.lap_index as usize != i + 1 {
                return Err(format!(
                    "{}: lap {} recorded as index {}",
                    entity.entity_id,
                    i + 1,
                    lap.lap_index
                ));
            }
            if lap.duration <= 0.0 || lap.duration < cooldown - 1e-9 {
                return Err(format!(
                    "{}: lap {} lasted {:.3}s, inside the {:.1}s cooldown",
                    entity.entity_id, lap.lap_index, lap.duration, cooldown
                ));
            }
            if lap.completed_at <= previous_completion {
                return Err(format!("{}: laps out of order at lap {}", entity.entity_id, lap.lap_index));
            }
            previous_completion = lap.completed_at;
        }

        let fastest = entity
            .laps
            .iter()
            .map(|l| l.adjusted_time())
            .fold(f64::INFINITY, f64::min);
        match &entity.best_lap {
            Some(best) if (best.adjusted_time() - fastest).abs() > 1e-9 => {
                return Err(format!("{}: best lap is not the fastest", entity.entity_id));
            }
            None if !entity.laps.is_empty() => {
                return Err(format!("{}: laps recorded but no best lap", entity.entity_id));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Every penalty second applied is either charged to a lap or still pending.
fn check_penalties(snapshot: &RaceSnapshot, applied: &BTreeMap<EntityId, f64>) -> Result<(), String> {
    for entity in &snapshot.entities {
        let charged: f64 = entity.laps.iter().map(|l| l.penalty_seconds).sum();
        let expected = applied.get(&entity.entity_id).copied().unwrap_or(0.0);
        if (charged + entity.pending_penalty - expected).abs() > 1e-9 {
            return Err(format!(
                "{}: {:.1}s of penalties applied but {:.1}s charged and {:.1}s pending",
                entity.entity_id, expected, charged, entity.pending_penalty
            ));
        }
    }
    Ok(())
}

/// Lap counts must match the oracle's true crossings.
fn check_lap_counts(snapshot: &RaceSnapshot, oracle: &Oracle, plan: &Plan, end: f64) -> Result<(), String> {
    for car in oracle.cars() {
        let recorded = snapshot.entity(&car.label).map(|e| e.lap_count()).unwrap_or(0);

        let reversed = plan.cars.iter().any(|c| c.reversed && car.label.as_str() == c.label);
        let (min, max) = if reversed && plan.session.race.direction != CrossingDirection::Any {
            (0, 0)
        } else {
            let from = plan.counted_from;
            let certain = car
                .crossing_times
                .iter()
                .filter(|&&t| t > from + EDGE_MARGIN_SECS && t <= end - EDGE_MARGIN_SECS)
                .count();
            let possible = car
                .crossing_times
                .iter()
                .filter(|&&t| t > from && t <= end)
                .count();
            // Rolling start: the first crossing only starts the lap clock
            (certain.saturating_sub(1), possible.saturating_sub(1))
        };

        if recorded < min || recorded > max {
            return Err(format!(
                "{}: {} laps recorded, expected {}..={}",
                car.label, recorded, min, max
            ));
        }
    }
    Ok(())
}

/// Scenario-specific expectations.
fn check_scenario(
    scenario: ScenarioId,
    snapshot: &RaceSnapshot,
    metrics: &ScenarioMetrics,
    counted_from: f64,
) -> Result<(), String> {
    match scenario {
        ScenarioId::WrongWay if metrics.wrong_direction == 0 => {
            Err("Backwards car never hit the direction policy".to_string())
        }
        ScenarioId::ResetMidRace => {
            let stale = snapshot
                .entities
                .iter()
                .flat_map(|e| e.laps.iter())
                .any(|l| l.completed_at <= counted_from);
            if stale {
                Err("Laps from before the reset survived".to_string())
            } else {
                Ok(())
            }
        }
        ScenarioId::CleanLaps if metrics.dropped_samples > 0 || metrics.debounced > 0 => Err(format!(
            "Clean run dropped {} samples and debounced {} crossings",
            metrics.dropped_samples, metrics.debounced
        )),
        _ => Ok(()),
    }
}
