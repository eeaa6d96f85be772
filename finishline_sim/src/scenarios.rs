//! Race scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two cars, perfect detections
    CleanLaps,

    /// Pixel noise plus clutter: ghosts, duplicates and unknown labels
    NoisyDetector,

    /// Detections randomly missing
    Occlusion,

    /// A car parks on the finish line with jittery detections
    LineDwell,

    /// Operator penalty hotkeys during the race
    Penalties,

    /// Operator reset halfway through, then a fresh start
    ResetMidRace,

    /// One car drives the circuit backwards under a direction policy
    WrongWay,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CleanLaps,
            ScenarioId::NoisyDetector,
            ScenarioId::Occlusion,
            ScenarioId::LineDwell,
            ScenarioId::Penalties,
            ScenarioId::ResetMidRace,
            ScenarioId::WrongWay,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CleanLaps => "clean_laps",
            ScenarioId::NoisyDetector => "noisy_detector",
            ScenarioId::Occlusion => "occlusion",
            ScenarioId::LineDwell => "line_dwell",
            ScenarioId::Penalties => "penalties",
            ScenarioId::ResetMidRace => "reset_mid_race",
            ScenarioId::WrongWay => "wrong_way",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CleanLaps => "2 cars, noiseless detections, every lap must be timed",
            ScenarioId::NoisyDetector => "2.5px noise, ghosts, duplicates and unknown labels filtered",
            ScenarioId::Occlusion => "30% of detections missing, no lap lost or doubled",
            ScenarioId::LineDwell => "Car parks on the line for 1.5s, one crossing only",
            ScenarioId::Penalties => "Penalty hotkeys land on the next lap only",
            ScenarioId::ResetMidRace => "Reset at half time discards every earlier lap",
            ScenarioId::WrongWay => "Backwards car never scores under a direction policy",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean_laps" | "clean" => Ok(ScenarioId::CleanLaps),
            "noisy_detector" | "noisy" => Ok(ScenarioId::NoisyDetector),
            "occlusion" => Ok(ScenarioId::Occlusion),
            "line_dwell" | "dwell" => Ok(ScenarioId::LineDwell),
            "penalties" => Ok(ScenarioId::Penalties),
            "reset_mid_race" | "reset" => Ok(ScenarioId::ResetMidRace),
            "wrong_way" => Ok(ScenarioId::WrongWay),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
