//! Detection source abstraction.

use crate::error::EnvError;
use crate::types::DetectionFrame;
use std::collections::VecDeque;

/// Abstraction over whatever produces per-frame detections.
///
/// # Implementations
///
/// - **Production**: a camera/video capture wrapped around an object detector
/// - **Simulation**: the oracle in `finishline_sim`
/// - **Replay**: [`ReplaySource`] over a recorded list of frames
///
/// # Frame Flow
///
/// ```text
/// Camera            Detector              Core
///   |-- frame -------->|                    |
///   |                  |-- DetectionFrame ->|-- update() per entity
/// ```
pub trait DetectionSource {
    /// Returns the next frame.
    ///
    /// # Returns
    /// * `Ok(Some(frame))` - A frame was produced
    /// * `Ok(None)` - End of stream
    /// * `Err(EnvError)` - The source failed
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>, EnvError>;
}

/// Replays a recorded sequence of frames, enforcing time order.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    frames: VecDeque<DetectionFrame>,
    last_timestamp: Option<f64>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = DetectionFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            last_timestamp: None,
        }
    }

    /// Number of frames not yet replayed.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>, EnvError> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };

        if let Some(previous) = self.last_timestamp {
            if frame.timestamp < previous {
                return Err(EnvError::TimeWentBackwards {
                    previous,
                    current: frame.timestamp,
                });
            }
        }
        self.last_timestamp = Some(frame.timestamp);

        Ok(Some(frame))
    }
}
