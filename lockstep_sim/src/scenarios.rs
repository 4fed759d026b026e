//! Fault scenarios for the lockstep harness.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// LS-001: fixed latency, no faults
    Steady,

    /// LS-002: heavy delivery jitter
    Jitter,

    /// LS-003: one replica partitioned away, then healed
    Partition,

    /// LS-004: spawn-heavy input
    SpawnStorm,

    /// LS-005: one replica applies a local-only command
    Divergence,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::Jitter,
            ScenarioId::Partition,
            ScenarioId::SpawnStorm,
            ScenarioId::Divergence,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Partition => "partition",
            ScenarioId::SpawnStorm => "spawn_storm",
            ScenarioId::Divergence => "divergence",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "Fixed 1-tick latency; replicas must agree at every checkpoint",
            ScenarioId::Jitter => "0-8 tick jitter on every link; frame delay absorbs it",
            ScenarioId::Partition => "One replica cut off for 60 ticks, then catches up",
            ScenarioId::SpawnStorm => "Up to 12 commands per frame, mostly spawns",
            ScenarioId::Divergence => "Corrupted replica must be caught at the next checkpoint",
        }
    }

    /// Returns true if the scenario expects a desync to be detected.
    pub fn expects_desync(&self) -> bool {
        matches!(self, ScenarioId::Divergence)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" | "ls-001" => Ok(ScenarioId::Steady),
            "jitter" | "ls-002" => Ok(ScenarioId::Jitter),
            "partition" | "ls-003" => Ok(ScenarioId::Partition),
            "spawn_storm" | "spawnstorm" | "ls-004" => Ok(ScenarioId::SpawnStorm),
            "divergence" | "ls-005" => Ok(ScenarioId::Divergence),
            _ => Err(HarnessError::UnknownScenario(s.to_string())),
        }
    }
}
