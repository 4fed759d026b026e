//! Simulation configuration.

use crate::desync::DesyncDetection;
use crate::error::ConfigError;
use crate::fixed::Fix64;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default simulation rate in frames per second.
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Configuration shared by every replica of a session.
///
/// Replicas must agree on every field; a mismatch is itself a desync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frames per second; also fixes the physics tick length
    pub tick_rate: u32,

    /// Frames of lookahead required before a frame is consumed
    pub frame_delay: u32,

    /// Initial seed of the shared RNG
    pub seed: u64,

    /// Checksum comparison schedule
    pub desync: DesyncDetection,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            frame_delay: 0,
            seed: 0,
            desync: DesyncDetection::default(),
        }
    }
}

impl SimulationConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::InvalidTickRate(self.tick_rate));
        }
        if self.desync == (DesyncDetection::On { interval: 0 }) {
            return Err(ConfigError::InvalidChecksumInterval);
        }
        Ok(())
    }

    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub fn with_frame_delay(mut self, frame_delay: u32) -> Self {
        self.frame_delay = frame_delay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_desync(mut self, desync: DesyncDetection) -> Self {
        self.desync = desync;
        self
    }

    /// Real-time length of one frame, for schedulers calling `step`.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Simulated length of one frame, in seconds, as fixed point.
    pub fn fixed_dt(&self) -> Fix64 {
        Fix64::from_ratio(1, self.tick_rate.max(1) as i64)
    }
}
