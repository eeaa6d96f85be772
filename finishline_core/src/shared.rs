//! Thread-safe handle to a race.
//!
//! Detection may run on several workers; the race itself has a single
//! logical writer. `SharedRace` serialises every call under one lock and
//! hands readers owned snapshots, so a renderer never observes a half-applied
//! update.

use crate::race::{Lap, RaceError, RacePhase, RaceSnapshot, RaceState, UpdateOutcome};
use finishline_env::{EntityId, Point};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable, lock-protected race handle.
#[derive(Debug, Clone)]
pub struct SharedRace {
    inner: Arc<Mutex<RaceState>>,
}

impl SharedRace {
    pub fn new(race: RaceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(race)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RaceState> {
        // A panic mid-update cannot leave a lap half-recorded, so the state
        // behind a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the race.
    pub fn with<R>(&self, f: impl FnOnce(&mut RaceState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn set_finish_line(&self, p1: Point, p2: Point) -> Result<(), RaceError> {
        self.lock().set_finish_line(p1, p2)
    }

    pub fn start(&self) -> Result<(), RaceError> {
        self.lock().start()
    }

    pub fn start_at(&self, timestamp: f64) -> Result<(), RaceError> {
        self.lock().start_at(timestamp)
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    pub fn update(&self, id: &EntityId, position: Point, timestamp: f64) -> Result<UpdateOutcome, RaceError> {
        self.lock().update(id, position, timestamp)
    }

    pub fn apply_penalty(&self, id: &EntityId, seconds: f64) -> Result<f64, RaceError> {
        self.lock().apply_penalty(id, seconds)
    }

    pub fn revert_penalty(&self, id: &EntityId, seconds: f64) -> Result<f64, RaceError> {
        self.lock().revert_penalty(id, seconds)
    }

    pub fn phase(&self) -> RacePhase {
        self.lock().phase()
    }

    /// Copy of an entity's laps.
    pub fn laps(&self, id: &EntityId) -> Vec<Lap> {
        self.lock().laps(id).to_vec()
    }

    /// Owned snapshot taken under the lock.
    pub fn snapshot(&self) -> RaceSnapshot {
        self.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_writers_serialised() {
        let shared = SharedRace::new(RaceState::with_defaults());
        shared
            .set_finish_line(Point::new(0.0, 100.0), Point::new(640.0, 100.0))
            .unwrap();
        shared.start().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let id = EntityId::new(format!("car-{}", worker));
                    for i in 0..50 {
                        shared
                            .update(&id, Point::new(10.0 * i as f64, 50.0), i as f64 * 0.1)
                            .unwrap();
                    }
                    shared.apply_penalty(&id, 2.0).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.entities.len(), 4);
        for entity in &snapshot.entities {
            assert_eq!(entity.pending_penalty, 2.0);
            assert!(entity.laps.is_empty());
        }
    }

    #[test]
    fn test_snapshot_is_detached() {
        let shared = SharedRace::new(RaceState::with_defaults());
        shared
            .set_finish_line(Point::new(0.0, 100.0), Point::new(640.0, 100.0))
            .unwrap();
        shared.start().unwrap();

        let id = EntityId::from("blue-car");
        shared.update(&id, Point::new(100.0, 90.0), 0.0).unwrap();
        shared.update(&id, Point::new(100.0, 110.0), 0.1).unwrap();
        let before = shared.snapshot();

        shared.update(&id, Point::new(100.0, 90.0), 5.1).unwrap();
        shared.update(&id, Point::new(100.0, 110.0), 5.2).unwrap();

        assert!(before.entity(&id).unwrap().laps.is_empty());
        assert_eq!(shared.laps(&id).len(), 1);
        assert_eq!(shared.with(|race| race.total_laps()), 1);
    }
}
