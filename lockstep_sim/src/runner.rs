//! Scenario runner - executes the lockstep fault scenarios.

use crate::arena::InputProfile;
use crate::error::HarnessError;
use crate::exporter::ChecksumTrace;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use lockstep_core::FrameIndex;
use lockstep_env::NetworkController;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Real-time ticks executed
    pub total_ticks: u64,

    /// Frames consumed by the first replica
    pub frames_consumed: FrameIndex,

    /// Number of admitted entities at end (first replica)
    pub final_entity_count: usize,

    /// Final state checksum of the first replica
    pub final_checksum: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub frames_sent: u64,
    pub frames_delivered: u64,

    /// Deliveries postponed by partitions
    pub frames_held: u64,

    /// Largest send-to-delivery delay (ticks)
    pub max_delay_ticks: u64,

    /// Largest unconsumed backlog seen by any replica
    pub max_backlog: u32,

    pub commands_applied: u64,
    pub commands_rejected: u64,

    pub checkpoints: u64,
    pub checkpoints_matched: u64,
    pub desyncs: u64,

    /// First checkpoint at which a desync was seen
    pub first_desync_frame: Option<FrameIndex>,
}

/// Runs lockstep scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of replicas
    num_replicas: usize,

    /// Input frames per run
    ticks: u32,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_replicas: usize) -> Self {
        Self {
            seed,
            num_replicas: num_replicas.max(2),
            ticks: 600,
        }
    }

    /// Sets the number of input frames.
    pub fn with_ticks(mut self, ticks: u32) -> Self {
        self.ticks = ticks.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, HarnessError> {
        Ok(self.run_traced(scenario)?.0)
    }

    /// Runs a scenario and also returns its checksum trace.
    pub fn run_traced(
        &self,
        scenario: ScenarioId,
    ) -> Result<(ScenarioResult, ChecksumTrace), HarnessError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut world = match scenario {
            ScenarioId::Steady => SimWorld::new(self.base_config())?,
            ScenarioId::Jitter => SimWorld::new(SimConfig {
                jitter_ticks: 3.0,
                frame_delay: 4,
                ..self.base_config()
            })?,
            ScenarioId::Partition => SimWorld::new(self.base_config())?,
            ScenarioId::SpawnStorm => {
                SimWorld::with_profile(self.base_config(), InputProfile::storm())?
            }
            ScenarioId::Divergence => {
                let mut world = SimWorld::new(self.base_config())?;
                world.corrupt_replica(self.num_replicas - 1, self.corrupt_frame());
                world
            }
        };

        let total_ticks = if scenario == ScenarioId::Partition {
            self.drive_partition(&mut world)
        } else {
            world.run_until_settled(self.tick_budget())
        };

        let failure_reason = self.check(scenario, &world);
        let passed = failure_reason.is_none();
        match &failure_reason {
            None => debug!("{} passed after {} ticks", scenario, total_ticks),
            Some(reason) => warn!("{} failed: {}", scenario, reason),
        }

        let mut trace = ChecksumTrace::new(scenario.name(), self.seed);
        trace.replicas = world.peers().iter().map(ToString::to_string).collect();
        trace.record(world.checkpoints());
        trace.desyncs = world.desyncs().to_vec();
        trace.finalize(passed, failure_reason.clone());

        let first = &world.replicas()[0];
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks,
            frames_consumed: first.frames_consumed(),
            final_entity_count: first.simulation().entities().len(),
            final_checksum: first.checksum(),
            failure_reason,
            metrics: Self::metrics(&world),
        };
        Ok((result, trace))
    }

    fn base_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            num_replicas: self.num_replicas,
            ticks: self.ticks,
            ..SimConfig::default()
        }
    }

    /// Generous upper bound on ticks before a run counts as stalled.
    fn tick_budget(&self) -> u64 {
        self.ticks as u64 * 2 + 200
    }

    fn corrupt_frame(&self) -> FrameIndex {
        self.ticks / 3
    }

    /// Cuts the first replica off for 60 ticks, then heals.
    fn drive_partition(&self, world: &mut SimWorld) -> u64 {
        let cut_at = (self.ticks / 4) as u64;
        let heal_at = cut_at + 60;
        let isolated = world.peers()[0];
        let sequencer = world.sequencer();
        let controller = world.controller().clone();

        let mut ran = 0;
        while !world.is_settled() && ran < self.tick_budget() + 60 {
            if ran == cut_at {
                info!("partitioning replica {} at tick {}", isolated, ran);
                controller.partition(&[sequencer], &[isolated]);
            } else if ran == heal_at {
                info!("healing at tick {}", ran);
                controller.heal_all();
            }
            world.tick();
            ran += 1;
        }
        ran
    }

    /// Returns the reason a scenario failed, if it did.
    fn check(&self, scenario: ScenarioId, world: &SimWorld) -> Option<String> {
        if !world.is_settled() {
            return Some(format!(
                "replicas stalled after {} ticks",
                world.tick_count()
            ));
        }

        if scenario.expects_desync() {
            let interval = world.config.checksum_interval.max(1);
            // Staged at the corrupted frame, admitted one frame later
            let diverged = self.corrupt_frame() + 2;
            let expected = diverged.div_ceil(interval) * interval;
            return match world.desyncs().iter().map(|r| r.frame).min() {
                None => Some("corruption went undetected".to_string()),
                Some(frame) if expected <= self.ticks && frame != expected => Some(format!(
                    "desync detected at frame {}, expected {}",
                    frame, expected
                )),
                Some(_) => None,
            };
        }

        if let Some(report) = world.desyncs().first() {
            return Some(report.to_string());
        }

        let replicas = world.replicas();
        let first = &replicas[0];
        for other in &replicas[1..] {
            if other.frames_consumed() != first.frames_consumed() {
                return Some(format!(
                    "replica {} consumed {} frames, replica {} consumed {}",
                    other.peer(),
                    other.frames_consumed(),
                    first.peer(),
                    first.frames_consumed()
                ));
            }
            if other.checksum() != first.checksum() {
                return Some(format!(
                    "final checksum {:#018x} of {} differs from {:#018x}",
                    other.checksum(),
                    other.peer(),
                    first.checksum()
                ));
            }
        }

        match scenario {
            ScenarioId::Partition if world.network().stats().held == 0 => {
                Some("partition never held a frame".to_string())
            }
            ScenarioId::SpawnStorm if first.simulation().entities().is_empty() => {
                Some("no units survived the storm".to_string())
            }
            _ => None,
        }
    }

    fn metrics(world: &SimWorld) -> ScenarioMetrics {
        let net = world.network().stats();
        let mut metrics = ScenarioMetrics {
            frames_sent: net.sent,
            frames_delivered: net.delivered,
            frames_held: net.held,
            max_delay_ticks: net.max_delay_ticks,
            checkpoints: world.checkpoints().len() as u64,
            desyncs: world.desyncs().len() as u64,
            first_desync_frame: world.desyncs().iter().map(|r| r.frame).min(),
            ..ScenarioMetrics::default()
        };
        for replica in world.replicas() {
            let stats = replica.stats();
            metrics.max_backlog = metrics.max_backlog.max(stats.max_backlog);
            metrics.commands_applied += stats.commands_applied;
            metrics.commands_rejected += stats.commands_rejected;
            metrics.checkpoints_matched += replica.detector().matched();
        }
        metrics
    }
}
