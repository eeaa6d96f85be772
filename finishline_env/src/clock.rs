//! Production implementation of RaceContext.

use crate::RaceContext;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Production context backed by the monotonic system clock.
pub struct SystemClock {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl SystemClock {
    /// Creates a new SystemClock starting at zero.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped clock for sharing across threads.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RaceContext for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}
