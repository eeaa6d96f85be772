//! Race and session configuration.
//!
//! Every tunable lives in a plain struct with a `Default` and a `validate()`
//! that must pass before a race can be armed. Invalid constants are a setup
//! error, never something discovered mid-race.

use crate::crossing::CrossingDirection;
use finishline_env::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// RACE CONFIGURATION
// ============================================================================

/// Tunables for crossing detection and lap timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Samples a track needs before it is eligible for crossing checks (default: 2)
    pub min_history_length: usize,

    /// Samples retained per track, oldest evicted first (default: 2)
    pub history_capacity: usize,

    /// Longest silence between two samples of an entity before its history
    /// restarts (default: 2.0 s)
    pub max_sample_gap_seconds: f64,

    /// Minimum time between two crossings of the same entity (default: 2.0 s)
    pub lap_cooldown_seconds: f64,

    /// Seconds added by one penalty hotkey press (default: 2.0 s)
    pub penalty_increment_seconds: f64,

    /// How long a snapshot reports an entity as "penalty flashing" (default: 0.5 s)
    pub penalty_flash_seconds: f64,

    /// An entity not seen for this long is reported as not visible (default: 1.0 s)
    pub visibility_timeout_seconds: f64,

    /// Which crossing direction counts as a lap (default: any)
    pub direction: CrossingDirection,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            min_history_length: 2,
            history_capacity: 2,
            max_sample_gap_seconds: 2.0,
            lap_cooldown_seconds: 2.0,
            penalty_increment_seconds: 2.0,
            penalty_flash_seconds: 0.5,
            visibility_timeout_seconds: 1.0,
            direction: CrossingDirection::Any,
        }
    }
}

impl RaceConfig {
    /// Checks every constant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_history_length < 2 {
            return Err(ConfigError::InvalidHistoryLength(self.min_history_length));
        }
        if self.history_capacity < self.min_history_length {
            return Err(ConfigError::InvalidHistoryCapacity {
                capacity: self.history_capacity,
                min_history: self.min_history_length,
            });
        }
        if !self.lap_cooldown_seconds.is_finite() || self.lap_cooldown_seconds < 0.0 {
            return Err(ConfigError::InvalidCooldown(self.lap_cooldown_seconds));
        }
        if self.max_sample_gap_seconds.is_nan() || self.max_sample_gap_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration {
                name: "max_sample_gap_seconds",
                value: self.max_sample_gap_seconds,
            });
        }
        if !self.penalty_increment_seconds.is_finite() || self.penalty_increment_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration {
                name: "penalty_increment_seconds",
                value: self.penalty_increment_seconds,
            });
        }
        if !self.penalty_flash_seconds.is_finite() || self.penalty_flash_seconds < 0.0 {
            return Err(ConfigError::InvalidDuration {
                name: "penalty_flash_seconds",
                value: self.penalty_flash_seconds,
            });
        }
        if !self.visibility_timeout_seconds.is_finite() || self.visibility_timeout_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration {
                name: "visibility_timeout_seconds",
                value: self.visibility_timeout_seconds,
            });
        }
        Ok(())
    }
}

// ============================================================================
// SESSION CONFIGURATION
// ============================================================================

/// A known race entrant: detector label plus the name shown to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrant {
    pub id: EntityId,
    pub display_name: String,
}

impl Entrant {
    pub fn new(id: impl Into<EntityId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Configuration for a full capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lap timing tunables
    pub race: RaceConfig,

    /// Detections below this confidence are discarded (default: 0.5)
    pub confidence_threshold: f64,

    /// Labels that take part in the race. Empty means "accept every label".
    pub roster: Vec<Entrant>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            race: RaceConfig::default(),
            confidence_threshold: 0.5,
            roster: vec![
                Entrant::new("blue-car", "Blue Car"),
                Entrant::new("green-car", "Green Car"),
            ],
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.race.validate()?;

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidConfidence(self.confidence_threshold));
        }

        let mut seen = HashSet::new();
        for entrant in &self.roster {
            if !seen.insert(&entrant.id) {
                return Err(ConfigError::DuplicateEntrant(entrant.id.clone()));
            }
        }
        Ok(())
    }

    /// Looks up the roster entry for a label.
    pub fn entrant(&self, id: &EntityId) -> Option<&Entrant> {
        self.roster.iter().find(|e| &e.id == id)
    }

    /// True if detections with this label take part in the race.
    pub fn accepts(&self, id: &EntityId) -> bool {
        self.roster.is_empty() || self.entrant(id).is_some()
    }

    /// Human-readable name for a label (falls back to the label itself).
    pub fn display_name(&self, id: &EntityId) -> String {
        self.entrant(id)
            .map(|e| e.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Setup errors. Fatal before a race can run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Finish line endpoints are identical at ({x}, {y})")]
    DegenerateLine { x: f64, y: f64 },

    #[error("Finish line endpoints must be finite")]
    NonFiniteLine,

    #[error("Minimum history length must be at least 2, got {0}")]
    InvalidHistoryLength(usize),

    #[error("History capacity {capacity} is smaller than minimum history {min_history}")]
    InvalidHistoryCapacity { capacity: usize, min_history: usize },

    #[error("Lap cooldown must be finite and non-negative, got {0}")]
    InvalidCooldown(f64),

    #[error("Invalid {name}: {value}")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("Confidence threshold must be within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("Entrant listed twice in roster: {0}")]
    DuplicateEntrant(EntityId),
}

// ============================================================================
// TESTS
// ============================================================================
