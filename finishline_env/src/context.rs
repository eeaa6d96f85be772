//! Clock context trait for FinishLine sessions.

use std::time::SystemTime;

/// The central interface for reading time.
///
/// This trait abstracts the "real world" clock so that the race engine can be
/// driven by a capture loop in production and by a virtual clock in tests
/// and simulation.
///
/// # Implementations
///
/// - **Production**: `SystemClock` - wraps `std::time::Instant`
/// - **Simulation**: `SimClock` - manually advanced virtual time
pub trait RaceContext: Send + Sync + 'static {
    /// Returns seconds elapsed since the context was created.
    ///
    /// Used to stamp frames that arrive without a detector timestamp and to
    /// compute in-progress lap times for snapshots.
    fn now(&self) -> f64;

    /// Returns the wall-clock time.
    ///
    /// Only used for naming export files.
    fn system_time(&self) -> SystemTime;
}
