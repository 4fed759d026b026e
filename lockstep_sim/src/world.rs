//! SimWorld - The multi-replica harness container.

use crate::arena::{ArenaCommand, InputProfile, InputScript};
use crate::context::{SimContext, STREAM_INPUT, STREAM_NETWORK};
use crate::error::HarnessError;
use crate::network::{SimNetwork, SimNetworkController};
use crate::replica::{Checkpoint, Replica};

use lockstep_core::{DesyncDetection, DesyncReport, FrameIndex, SimulationConfig};
use lockstep_env::{Frame, NetworkController, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of replicas to run
    pub num_replicas: usize,

    /// Frames of input the sequencer produces
    pub ticks: u32,

    /// Frames per second
    pub tick_rate: u32,

    /// Lookahead every replica waits for
    pub frame_delay: u32,

    /// Base sequencer-to-replica latency, in ticks
    pub latency_ticks: u32,

    /// Jitter standard deviation, in ticks
    pub jitter_ticks: f64,

    /// Frames between checksum comparisons
    pub checksum_interval: u32,

    /// Frames a lagging replica may step in one tick to catch up
    pub catch_up_steps: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_replicas: 4,
            ticks: 600,
            tick_rate: lockstep_core::DEFAULT_TICK_RATE,
            frame_delay: 2,
            latency_ticks: 1,
            jitter_ticks: 0.0,
            checksum_interval: 10,
            catch_up_steps: 4,
        }
    }
}

impl SimConfig {
    /// Core configuration shared by every replica.
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig::default()
            .with_seed(self.seed)
            .with_tick_rate(self.tick_rate)
            .with_frame_delay(self.frame_delay)
            .with_desync(DesyncDetection::On {
                interval: self.checksum_interval,
            })
    }
}

/// The SimWorld - a sequencer, a network and N replicas.
///
/// Each tick the sequencer emits one frame of generated input, the network
/// delivers whatever is due, every replica steps, and checkpoint checksums
/// are exchanged.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared virtual clock
    pub context: Arc<SimContext>,

    /// Generated player input
    input: InputScript,

    network: SimNetwork<ArenaCommand>,
    controller: SimNetworkController,
    replicas: Vec<Replica>,

    /// Frames the sequencer has emitted
    frames_sent: FrameIndex,

    /// Checkpoints announced by replicas, in announcement order
    checkpoints: Vec<Checkpoint>,

    desyncs: Vec<DesyncReport>,
}

impl SimWorld {
    /// Creates a world with the skirmish input profile.
    pub fn new(config: SimConfig) -> Result<Self, HarnessError> {
        Self::with_profile(config, InputProfile::default())
    }

    pub fn with_profile(config: SimConfig, profile: InputProfile) -> Result<Self, HarnessError> {
        let sim_config = config.simulation_config();
        sim_config.validate()?;

        let context = SimContext::shared(config.seed, config.tick_rate);
        let sequencer = PeerId::from_seed(u64::MAX);
        let peers: Vec<PeerId> = (0..config.num_replicas as u64)
            .map(PeerId::from_seed)
            .collect();

        let network = SimNetwork::new(sequencer, &peers, context.stream_rng(STREAM_NETWORK));
        let controller = network.controller();
        for &peer in &peers {
            controller.set_link_latency(sequencer, peer, config.latency_ticks);
            controller.set_link_jitter(sequencer, peer, config.jitter_ticks);
        }

        let replicas = peers
            .iter()
            .map(|&peer| Replica::new(peer, sim_config.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "SimWorld: {} replicas, seed={}, delay={}, latency={}t, jitter={}t",
            config.num_replicas,
            config.seed,
            config.frame_delay,
            config.latency_ticks,
            config.jitter_ticks
        );

        Ok(Self {
            input: InputScript::new(context.stream_seed(STREAM_INPUT), profile),
            context,
            network,
            controller,
            replicas,
            frames_sent: 0,
            checkpoints: Vec::new(),
            desyncs: Vec::new(),
            config,
        })
    }

    /// Makes one replica apply a local-only command at `frame`.
    pub fn corrupt_replica(&mut self, replica: usize, frame: FrameIndex) {
        if let Some(slot) = self.replicas.get_mut(replica) {
            slot.set_corrupt_at(frame);
        }
    }

    /// Fault injection handle for the network.
    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }

    pub fn sequencer(&self) -> PeerId {
        self.network.sequencer()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.replicas.iter().map(Replica::peer).collect()
    }

    /// Advances the world by one real-time tick.
    pub fn tick(&mut self) {
        let now = self.context.ticks();

        // 1. Sequencer emits the next agreed frame
        if self.frames_sent < self.config.ticks {
            let frame = Frame::new(self.input.next_frame());
            self.network.broadcast(self.frames_sent, &frame, now);
            self.frames_sent += 1;
        } else if self.frames_sent < self.total_frames() {
            // Trailing empty frames let every replica consume the input
            // despite the frame delay
            self.network.broadcast(self.frames_sent, &Frame::empty(), now);
            self.frames_sent += 1;
        }

        // 2. Network delivers, replicas step
        let mut announced = Vec::new();
        for replica in &mut self.replicas {
            for (index, frame) in self.network.deliver(replica.peer(), now) {
                replica.receive(index, frame);
            }
            announced.extend(replica.tick(self.config.catch_up_steps.max(1)));
        }

        // 3. Checkpoint exchange (control plane, instant)
        for checkpoint in &announced {
            for replica in &mut self.replicas {
                if let Some(report) = replica.observe(checkpoint) {
                    self.desyncs.push(report);
                }
            }
        }
        self.checkpoints.extend(announced);

        self.context.advance();
    }

    /// Frames the run emits: the input plus trailing empty frames.
    pub fn total_frames(&self) -> FrameIndex {
        self.config.ticks + self.config.frame_delay
    }

    /// Returns true once every replica has consumed all input frames.
    pub fn is_settled(&self) -> bool {
        self.frames_sent >= self.total_frames()
            && self
                .replicas
                .iter()
                .all(|r| r.frames_consumed() >= self.config.ticks)
    }

    /// Ticks until settled or until `max_ticks` have passed.
    ///
    /// Returns the number of ticks run.
    pub fn run_until_settled(&mut self, max_ticks: u64) -> u64 {
        let mut ran = 0;
        while !self.is_settled() && ran < max_ticks {
            self.tick();
            ran += 1;
        }
        if !self.is_settled() {
            debug!("not settled after {} ticks", ran);
        }
        ran
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn network(&self) -> &SimNetwork<ArenaCommand> {
        &self.network
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Every mismatch seen by any replica.
    pub fn desyncs(&self) -> &[DesyncReport] {
        &self.desyncs
    }

    pub fn frames_sent(&self) -> FrameIndex {
        self.frames_sent
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.context.ticks()
    }

    /// Spawn commands generated so far.
    pub fn spawns_issued(&self) -> u64 {
        self.input.issued()
    }
}
