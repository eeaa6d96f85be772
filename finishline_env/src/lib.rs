//! FinishLine Environment Abstraction Layer
//!
//! This crate holds everything the lap-timing core touches at its boundary:
//! - Time (`now()`, `system_time()`)
//! - Detector output (`DetectionSource::next_frame()`)
//! - The wire types exchanged with the detector and the renderer
//!
//! The core never reads a wall clock or a camera directly. Production code
//! plugs in [`SystemClock`]; the simulator plugs in a manually advanced clock
//! so every run is reproducible from its seed.
//!
//! # Example
//!
//! ```ignore
//! use finishline_core::{RaceSession, SessionConfig};
//! use finishline_env::{ReplaySource, SystemClock};
//!
//! let mut session = RaceSession::new(SystemClock::shared(), SessionConfig::default())?;
//! // ... two line clicks and a start ...
//! let crossings = session.drive(&mut ReplaySource::new(recorded_frames))?;
//! ```

mod context;
mod source;
mod types;
mod error;
mod clock;

pub use context::RaceContext;
pub use source::{DetectionSource, ReplaySource};
pub use types::{Detection, DetectionFrame, EntityId, Point};
pub use error::EnvError;
pub use clock::SystemClock;
