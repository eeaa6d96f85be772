//! FinishLine Deterministic Simulation Harness
//!
//! Replaces the camera and the object detector with a seeded oracle so the
//! lap timer can be tested end to end without video:
//! - **Time**: a virtual clock advanced frame by frame
//! - **Detector**: noisy, lossy, cluttered detections of cars on a circuit
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────┐  DetectionFrame  ┌───────────────────┐   │
//! │  │   Oracle   │ ───────────────► │    RaceSession    │   │
//! │  │ (circuit,  │                  │  (SimClock ctx)   │   │
//! │  │  cars)     │                  └─────────┬─────────┘   │
//! │  └─────┬──────┘                            │ snapshot    │
//! │        │ true crossing times               ▼             │
//! │        └──────────────────────────► lap count checks     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use finishline_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(30.0).run(ScenarioId::Occlusion);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
pub mod exporter;
pub mod pipeline;
pub mod runner;
pub mod scenarios;

pub use context::SimClock;
pub use exporter::{CarPosition, ReplayError, SimEvent, SimExport, SimFrame};
pub use oracle::{Circuit, Oracle, SimCar, CLUTTER_LABEL, FINISH_ANGLE};
pub use pipeline::{run_channel_pipeline, PipelineError, PipelineReport};
pub use runner::{check_invariants, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimConfig};
