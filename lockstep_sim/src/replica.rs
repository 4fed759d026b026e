//! One lockstep participant running the arena.

use crate::arena::{ArenaCommand, ArenaHandler, Unit, ARENA_HALF_EXTENT};
use crate::physics::{FixVec2, KinematicWorld};
use lockstep_core::{
    ConfigError, DesyncDetector, DesyncReport, Fix64, FrameIndex, Simulation, SimulationConfig,
    StateHash, StepOutcome,
};
use lockstep_env::{Frame, PeerId};
use tracing::{debug, warn};

/// The arena simulation as every replica runs it.
pub type ArenaSimulation = Simulation<ArenaCommand, Unit, ArenaHandler, KinematicWorld>;

/// A checksum a replica announces to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub peer: PeerId,

    /// Frames consumed when the checksum was taken
    pub frame: FrameIndex,
    pub checksum: u64,
}

/// Counters of what a replica stepped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub frames_received: u64,
    pub frames_stepped: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub max_backlog: u32,
}

/// A participant: its simulation, desync detector and fault injection.
pub struct Replica {
    peer: PeerId,
    sim: ArenaSimulation,
    detector: DesyncDetector,

    /// Frame whose local copy gets an extra command
    corrupt_at: Option<FrameIndex>,
    stats: ReplicaStats,
}

impl Replica {
    pub fn new(peer: PeerId, config: SimulationConfig) -> Result<Self, ConfigError> {
        let physics = KinematicWorld::new(config.fixed_dt(), Fix64::from_int(ARENA_HALF_EXTENT));
        let detector = DesyncDetector::new(config.desync);
        Ok(Self {
            peer,
            sim: Simulation::new(config, ArenaHandler::new(), physics)?,
            detector,
            corrupt_at: None,
            stats: ReplicaStats::default(),
        })
    }

    /// Makes this replica diverge at `frame` by applying a command no other
    /// replica sees.
    pub fn corrupt_at(mut self, frame: FrameIndex) -> Self {
        self.set_corrupt_at(frame);
        self
    }

    /// Same as [`corrupt_at`](Self::corrupt_at) on an existing replica.
    pub fn set_corrupt_at(&mut self, frame: FrameIndex) {
        self.corrupt_at = Some(frame);
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Accepts a frame from the network.
    pub fn receive(&mut self, index: FrameIndex, frame: Frame<ArenaCommand>) {
        let frame = if self.corrupt_at == Some(index) {
            warn!("replica {} corrupting frame {}", self.peer, index);
            let mut commands = frame.into_commands();
            commands.push(ArenaCommand::Spawn {
                team: u8::MAX,
                position: FixVec2::ZERO,
                velocity: FixVec2::ZERO,
            });
            Frame::new(commands)
        } else {
            frame
        };

        let stored = self.sim.push_frame(frame);
        debug_assert_eq!(stored, index, "frames must arrive in order");
        self.stats.frames_received += 1;
    }

    /// Steps up to `max_steps` ready frames.
    ///
    /// Returns the checkpoints reached, to be announced to the peers.
    pub fn tick(&mut self, max_steps: usize) -> Vec<Checkpoint> {
        self.stats.max_backlog = self.stats.max_backlog.max(self.sim.clock().backlog());

        let mut checkpoints = Vec::new();
        for _ in 0..max_steps {
            let StepOutcome::Stepped(report) = self.sim.step() else {
                break;
            };
            self.stats.frames_stepped += 1;
            self.stats.commands_applied += report.applied as u64;
            self.stats.commands_rejected += report.rejected.len() as u64;

            let consumed = report.frame + 1;
            if self.detector.is_checkpoint(consumed) {
                let checksum = self.checksum();
                self.detector.record_local(consumed, checksum);
                checkpoints.push(Checkpoint {
                    peer: self.peer,
                    frame: consumed,
                    checksum,
                });
            }
        }
        checkpoints
    }

    /// Compares a peer's checkpoint against ours.
    pub fn observe(&mut self, checkpoint: &Checkpoint) -> Option<DesyncReport> {
        if checkpoint.peer == self.peer {
            return None;
        }
        let report = self
            .detector
            .record_remote(checkpoint.peer, checkpoint.frame, checkpoint.checksum);
        if let Some(report) = &report {
            debug!("replica {} saw {}", self.peer, report);
        }
        report
    }

    /// Entity checksum combined with the physics state.
    pub fn checksum(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.sim.checksum());
        hasher.write_u64(self.sim.physics().fingerprint());
        hasher.finish()
    }

    pub fn frames_consumed(&self) -> FrameIndex {
        self.sim.frame_counter()
    }

    pub fn simulation(&self) -> &ArenaSimulation {
        &self.sim
    }

    pub fn detector(&self) -> &DesyncDetector {
        &self.detector
    }

    pub fn stats(&self) -> ReplicaStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::DesyncDetection;

    fn config() -> SimulationConfig {
        SimulationConfig::default().with_desync(DesyncDetection::On { interval: 2 })
    }

    fn spawn() -> ArenaCommand {
        ArenaCommand::Spawn {
            team: 0,
            position: FixVec2::from_ints(1, 1),
            velocity: FixVec2::from_ints(5, 0),
        }
    }

    #[test]
    fn test_checkpoints_every_interval() {
        let mut replica = Replica::new(PeerId::from_seed(1), config()).unwrap();
        for i in 0..5 {
            replica.receive(i, Frame::new(vec![spawn()]));
        }

        let checkpoints = replica.tick(10);

        let frames: Vec<_> = checkpoints.iter().map(|c| c.frame).collect();
        assert_eq!(frames, vec![2, 4]);
        assert_eq!(replica.frames_consumed(), 5);
        assert_eq!(replica.stats().frames_stepped, 5);
        assert_eq!(replica.stats().max_backlog, 5);
    }

    #[test]
    fn test_tick_respects_step_limit() {
        let mut replica = Replica::new(PeerId::from_seed(1), config()).unwrap();
        for i in 0..4 {
            replica.receive(i, Frame::empty());
        }

        replica.tick(1);
        assert_eq!(replica.frames_consumed(), 1);
    }

    #[test]
    fn test_identical_replicas_agree() {
        let mut a = Replica::new(PeerId::from_seed(1), config()).unwrap();
        let mut b = Replica::new(PeerId::from_seed(2), config()).unwrap();
        for i in 0..4 {
            a.receive(i, Frame::new(vec![spawn()]));
            b.receive(i, Frame::new(vec![spawn()]));
        }

        let from_a = a.tick(4);
        let from_b = b.tick(4);
        for checkpoint in &from_b {
            assert_eq!(a.observe(checkpoint), None);
        }
        for checkpoint in &from_a {
            assert_eq!(b.observe(checkpoint), None);
        }
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.detector().matched(), 2);
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut a = Replica::new(PeerId::from_seed(1), config()).unwrap();
        let mut b = Replica::new(PeerId::from_seed(2), config()).unwrap().corrupt_at(1);
        for i in 0..4 {
            a.receive(i, Frame::empty());
            b.receive(i, Frame::empty());
        }

        a.tick(4);
        let reports: Vec<_> = b
            .tick(4)
            .iter()
            .filter_map(|checkpoint| a.observe(checkpoint))
            .collect();

        // Staged in frame 1 and admitted in frame 2, so the state first
        // differs at the checkpoint after four frames
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].frame, 4);
        assert_eq!(a.detector().first_desync().map(|r| r.frame), Some(4));
    }

    #[test]
    fn test_own_checkpoints_ignored() {
        let mut a = Replica::new(PeerId::from_seed(1), config()).unwrap();
        a.receive(0, Frame::empty());
        a.receive(1, Frame::empty());
        let own = a.tick(2);

        assert_eq!(a.observe(&own[0]), None);
        assert_eq!(a.detector().matched(), 0);
    }
}
