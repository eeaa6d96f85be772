//! Ground truth oracle for simulation.
//!
//! The Oracle drives RC cars around an elliptical circuit and plays the
//! object detector:
//! - True positions and lap progress of every car (kinematics)
//! - Detection frames generated from them (noise, dropouts, clutter)
//! - The true finish-line crossing times, to judge the lap timer against
//!
//! Car progress is an unwrapped angle around the ellipse. The finish line
//! sits across the bottom of the circuit at `FINISH_ANGLE`; a car crosses it
//! whenever its angle passes `FINISH_ANGLE + k·τ`.

use finishline_env::{Detection, DetectionFrame, DetectionSource, EntityId, EnvError, Point};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, TAU};

/// Angle (radians) of the finish line on the circuit.
pub const FINISH_ANGLE: f64 = FRAC_PI_2;

/// Label used for clutter detections that belong to no entrant.
pub const CLUTTER_LABEL: &str = "red-car";

// ============================================================================
// CIRCUIT
// ============================================================================

/// Elliptical circuit in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub center: Point,
    pub radius_x: f64,
    pub radius_y: f64,
    /// Length of the finish line, centred on the racing line
    pub line_length: f64,
}

impl Default for Circuit {
    /// A 640x480 frame with the circuit filling most of it.
    fn default() -> Self {
        Self {
            center: Point::new(320.0, 240.0),
            radius_x: 200.0,
            radius_y: 150.0,
            line_length: 100.0,
        }
    }
}

impl Circuit {
    /// Point on the racing line at `angle`.
    pub fn position(&self, angle: f64) -> Point {
        let offset = Vector2::new(self.radius_x * angle.cos(), self.radius_y * angle.sin());
        let p = Vector2::new(self.center.x, self.center.y) + offset;
        Point::new(p.x, p.y)
    }

    /// Finish line endpoints, as an operator would click them: a segment
    /// across the racing line at `FINISH_ANGLE`, radial to the ellipse.
    pub fn finish_line(&self) -> (Point, Point) {
        let on_track = self.position(FINISH_ANGLE);
        let center = Vector2::new(self.center.x, self.center.y);
        let radial = (Vector2::new(on_track.x, on_track.y) - center).normalize();
        let half = radial * (self.line_length / 2.0);
        let track = Vector2::new(on_track.x, on_track.y);
        let (inner, outer) = (track - half, track + half);
        (Point::new(inner.x, inner.y), Point::new(outer.x, outer.y))
    }
}

// ============================================================================
// CARS
// ============================================================================

/// A ground truth car.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimCar {
    pub label: EntityId,

    /// Unwrapped progress around the circuit (radians)
    pub angle: f64,

    /// Angular speed (rad/s); negative drives the circuit backwards
    pub angular_speed: f64,

    /// Finish-line passes so far (floor of lap progress)
    passes: i64,

    /// Pass number on which the car stops on the line, and for how long
    dwell: Option<(u32, f64)>,

    dwell_remaining: f64,

    /// True times the car crossed the finish line
    pub crossing_times: Vec<f64>,
}

impl SimCar {
    fn new(label: EntityId, angle: f64, angular_speed: f64) -> Self {
        Self {
            label,
            angle,
            angular_speed,
            passes: Self::pass_index(angle),
            dwell: None,
            dwell_remaining: 0.0,
            crossing_times: Vec::new(),
        }
    }

    fn pass_index(angle: f64) -> i64 {
        ((angle - FINISH_ANGLE) / TAU).floor() as i64
    }

    /// Seconds per lap.
    pub fn lap_seconds(&self) -> f64 {
        TAU / self.angular_speed.abs()
    }

    pub fn is_dwelling(&self) -> bool {
        self.dwell_remaining > 0.0
    }

    fn step(&mut self, dt: f64, now: f64) {
        if self.dwell_remaining > 0.0 {
            self.dwell_remaining -= dt;
            return;
        }

        let next = self.angle + self.angular_speed * dt;
        let next_pass = Self::pass_index(next);
        if next_pass == self.passes {
            self.angle = next;
            return;
        }

        // Crossed the line during this step
        self.crossing_times.push(now);
        let crossing_number = self.crossing_times.len() as u32;
        self.passes = next_pass;

        match self.dwell {
            Some((on_pass, seconds)) if on_pass == crossing_number => {
                // Park just past the line
                self.angle = if self.angular_speed > 0.0 {
                    FINISH_ANGLE + TAU * next_pass as f64 + 1e-9
                } else {
                    FINISH_ANGLE + TAU * (next_pass + 1) as f64 - 1e-9
                };
                self.dwell_remaining = seconds;
            }
            _ => self.angle = next,
        }
    }
}

// ============================================================================
// ORACLE
// ============================================================================

/// The Oracle - maintains ground truth and generates detection frames.
#[derive(Debug)]
pub struct Oracle {
    /// RNG for detector noise and random events
    rng: ChaCha8Rng,

    circuit: Circuit,

    cars: Vec<SimCar>,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Pixel noise on detected centroids
    noise: Option<Normal<f64>>,

    /// Per car, per frame probability of a missed detection
    dropout_probability: f64,

    /// Per frame probability of spurious detections
    clutter_probability: f64,

    /// Physics step taken after each frame pulled through `DetectionSource`
    frame_interval: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given seed.
    pub fn new(seed: u64, circuit: Circuit) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            circuit,
            cars: Vec::new(),
            current_time: 0.0,
            noise: None,
            dropout_probability: 0.0,
            clutter_probability: 0.0,
            frame_interval: 1.0 / 30.0,
        }
    }

    /// Sets the time between frames pulled through `DetectionSource`.
    pub fn set_frame_interval(&mut self, dt: f64) {
        if dt.is_finite() && dt > 0.0 {
            self.frame_interval = dt;
        }
    }

    pub fn frame_interval(&self) -> f64 {
        self.frame_interval
    }

    /// Sets the centroid noise standard deviation in pixels. Zero disables it.
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.noise = if std_dev > 0.0 {
            Normal::new(0.0, std_dev).ok()
        } else {
            None
        };
    }

    pub fn set_dropout_probability(&mut self, p: f64) {
        self.dropout_probability = p.clamp(0.0, 1.0);
    }

    pub fn set_clutter_probability(&mut self, p: f64) {
        self.clutter_probability = p.clamp(0.0, 1.0);
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Spawns a car that first reaches the finish line after `first_crossing_in`
    /// seconds and laps every `lap_seconds`. Returns its index.
    pub fn spawn_car(&mut self, label: &str, lap_seconds: f64, first_crossing_in: f64) -> usize {
        let speed = TAU / lap_seconds;
        let angle = FINISH_ANGLE - speed * first_crossing_in;
        self.cars.push(SimCar::new(EntityId::from(label), angle, speed));
        self.cars.len() - 1
    }

    /// Spawns a car driving the circuit backwards.
    pub fn spawn_reversed_car(&mut self, label: &str, lap_seconds: f64, first_crossing_in: f64) -> usize {
        let speed = TAU / lap_seconds;
        let angle = FINISH_ANGLE + TAU + speed * first_crossing_in;
        self.cars.push(SimCar::new(EntityId::from(label), angle, -speed));
        self.cars.len() - 1
    }

    /// Makes a car stop on the line for `seconds` on its `pass`-th crossing.
    pub fn set_dwell(&mut self, car: usize, pass: u32, seconds: f64) {
        if let Some(car) = self.cars.get_mut(car) {
            car.dwell = Some((pass, seconds));
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let now = self.current_time;
        for car in &mut self.cars {
            car.step(dt, now);
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn cars(&self) -> &[SimCar] {
        &self.cars
    }

    pub fn car(&self, label: &EntityId) -> Option<&SimCar> {
        self.cars.iter().find(|c| &c.label == label)
    }

    /// True position of every car.
    pub fn ground_truth_positions(&self) -> Vec<(EntityId, Point)> {
        self.cars
            .iter()
            .map(|c| (c.label.clone(), self.circuit.position(c.angle)))
            .collect()
    }

    fn noisy(&mut self, p: Point) -> Point {
        match self.noise {
            Some(normal) => Point::new(
                p.x + normal.sample(&mut self.rng),
                p.y + normal.sample(&mut self.rng),
            ),
            None => p,
        }
    }

    /// Generates the detector output for the current instant.
    pub fn generate_frame(&mut self) -> DetectionFrame {
        let mut frame = DetectionFrame::new(self.current_time);

        let truth = self.ground_truth_positions();
        for (label, position) in truth {
            if self.dropout_probability > 0.0 && self.rng.gen_bool(self.dropout_probability) {
                continue;
            }
            let position = self.noisy(position);
            let confidence = self.rng.gen_range(0.7..0.99);
            frame.detections.push(Detection::new(label, position, confidence));
        }

        if self.clutter_probability > 0.0 && self.rng.gen_bool(self.clutter_probability) {
            frame.detections.extend(self.clutter());
        }

        frame
    }

    /// Spurious detections: an unknown label, a low-confidence ghost of a
    /// real car and a weaker duplicate of a real car elsewhere in frame.
    fn clutter(&mut self) -> Vec<Detection> {
        let mut clutter = Vec::new();
        let random_point = |rng: &mut ChaCha8Rng| Point::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0));

        clutter.push(Detection::new(
            CLUTTER_LABEL,
            random_point(&mut self.rng),
            self.rng.gen_range(0.5..0.99),
        ));

        if self.cars.is_empty() {
            return clutter;
        }
        let index = self.rng.gen_range(0..self.cars.len());
        let label = self.cars[index].label.clone();
        clutter.push(Detection::new(
            label.clone(),
            random_point(&mut self.rng),
            self.rng.gen_range(0.05..0.45),
        ));
        clutter.push(Detection::new(
            label,
            random_point(&mut self.rng),
            self.rng.gen_range(0.5..0.65),
        ));
        clutter
    }
}

/// An endless camera: each pull captures the current instant and then
/// advances physics by one frame interval.
impl DetectionSource for Oracle {
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>, EnvError> {
        let frame = self.generate_frame();
        self.step(self.frame_interval);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circuit_finish_line_crosses_track() {
        let circuit = Circuit::default();
        let (p1, p2) = circuit.finish_line();

        assert_relative_eq!(p1.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(p2.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(p1.y, 340.0, epsilon = 1e-9);
        assert_relative_eq!(p2.y, 440.0, epsilon = 1e-9);
    }

    #[test]
    fn test_car_crosses_once_per_lap() {
        let mut oracle = Oracle::new(42, Circuit::default());
        oracle.spawn_car("blue-car", 5.0, 1.5);

        let dt = 1.0 / 30.0;
        for _ in 0..(30 * 16) {
            oracle.step(dt);
        }

        let times = &oracle.cars()[0].crossing_times;
        assert_eq!(times.len(), 3); // ~1.5, 6.5, 11.5
        assert_relative_eq!(times[1] - times[0], 5.0, epsilon = 2.0 * dt);
    }

    #[test]
    fn test_reversed_car_crosses() {
        let mut oracle = Oracle::new(42, Circuit::default());
        oracle.spawn_reversed_car("green-car", 6.0, 1.0);

        for _ in 0..(30 * 8) {
            oracle.step(1.0 / 30.0);
        }
        assert_eq!(oracle.cars()[0].crossing_times.len(), 2);
    }

    #[test]
    fn test_dwell_holds_car_on_line() {
        let mut oracle = Oracle::new(42, Circuit::default());
        let car = oracle.spawn_car("blue-car", 5.0, 1.0);
        oracle.set_dwell(car, 1, 1.5);

        let dt = 1.0 / 30.0;
        for _ in 0..36 {
            oracle.step(dt);
        }
        assert!(oracle.cars()[0].is_dwelling());

        let (_, position) = oracle.ground_truth_positions().remove(0);
        assert_relative_eq!(position.x, 320.0, epsilon = 1e-3);

        for _ in 0..(30 * 10) {
            oracle.step(dt);
        }
        // Dwell delays later crossings but never adds one
        let times = &oracle.cars()[0].crossing_times;
        assert_eq!(times.len(), 2);
        assert_relative_eq!(times[1] - times[0], 6.5, epsilon = 2.0 * dt);
    }

    #[test]
    fn test_deterministic_frames() {
        let mut oracle1 = Oracle::new(7, Circuit::default());
        let mut oracle2 = Oracle::new(7, Circuit::default());
        for oracle in [&mut oracle1, &mut oracle2] {
            oracle.spawn_car("blue-car", 5.0, 1.0);
            oracle.set_position_noise(3.0);
            oracle.set_dropout_probability(0.2);
            oracle.set_clutter_probability(0.5);
        }

        for _ in 0..50 {
            assert_eq!(oracle1.generate_frame(), oracle2.generate_frame());
            oracle1.step(0.1);
            oracle2.step(0.1);
        }
    }

    #[test]
    fn test_clean_frame_has_every_car() {
        let mut oracle = Oracle::new(1, Circuit::default());
        oracle.spawn_car("blue-car", 5.0, 1.0);
        oracle.spawn_car("green-car", 6.0, 2.0);

        let frame = oracle.generate_frame();
        assert_eq!(frame.len(), 2);
        assert!(frame.detections.iter().all(|d| d.confidence >= 0.7));
    }

    #[test]
    fn test_source_pulls_advance_time() {
        let mut oracle = Oracle::new(3, Circuit::default());
        oracle.spawn_car("blue-car", 5.0, 1.0);
        oracle.set_frame_interval(0.5);

        let first = oracle.next_frame().unwrap().unwrap();
        let second = oracle.next_frame().unwrap().unwrap();

        assert_eq!(first.timestamp, 0.0);
        assert_relative_eq!(second.timestamp, 0.5, epsilon = 1e-12);
        assert_relative_eq!(oracle.time(), 1.0, epsilon = 1e-12);
        assert_eq!(second.len(), 1);
    }
}
