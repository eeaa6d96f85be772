//! Simulation clock implementing RaceContext for deterministic runs.

use finishline_env::RaceContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Virtual clock advanced only by the harness.
///
/// Clones share the same time, so a runner and the session it drives always
/// agree on "now".
pub struct SimClock {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped clock for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn time_ns(&self) -> std::sync::MutexGuard<'_, u64> {
        self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *self.time_ns() += duration.as_nanos() as u64;
    }

    /// Moves virtual time to `secs`. Earlier times are ignored.
    pub fn set_secs(&self, secs: f64) {
        if !secs.is_finite() || secs < 0.0 {
            return;
        }
        let target = Duration::from_secs_f64(secs).as_nanos() as u64;
        let mut time = self.time_ns();
        if target > *time {
            *time = target;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

impl RaceContext for SimClock {
    fn now(&self) -> f64 {
        *self.time_ns() as f64 / 1e9
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + Duration::from_nanos(*self.time_ns())
    }
}
