//! The frame-driven step engine.
//!
//! One call to [`Simulation::step`] consumes at most one frame and runs the
//! fixed tick pipeline:
//!
//! ```text
//! Idle ──try_pop ok──► Stepping
//!                        1. admit staged entities
//!                        2. apply frame commands (in listed order)
//!                        3. simulate every entity (ascending id)
//!                        4. physics.update() (one fixed tick)
//! Idle ◄──────────────── publish snapshot
//! ```
//!
//! # Threading
//!
//! Exactly one thread owns the `Simulation` and calls `step`. Producers use
//! the shared handles from [`Simulation::frame_sink`] and
//! [`Simulation::spawner`]; the two are guarded by independent locks.
//! Other threads read world state through a [`SnapshotHandle`], which shows
//! the state as of the last completed step.

use crate::config::SimulationConfig;
use crate::entity::{EntityId, LockstepEntity, Spawn, TickContext};
use crate::error::{ConfigError, SimError};
use crate::fixed::Fix64;
use crate::frame_buffer::{FrameBuffer, NotReady, SimulationClock};
use crate::handler::{CommandHandler, World};
use crate::registry::{EntityRegistry, SpawnQueue};
use crate::rng::DeterministicRng;
use lockstep_env::{Frame, FrameIndex, PhysicsWorld};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace};

/// Engine state between and during steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for enough buffered frames
    Idle,
    /// Executing one frame
    Stepping,
}

/// What a call to [`Simulation::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not enough lookahead buffered; nothing happened.
    NotReady { backlog: u32, frame_delay: u32 },
    /// One frame was consumed.
    Stepped(StepReport),
}

impl StepOutcome {
    pub fn is_stepped(&self) -> bool {
        matches!(self, StepOutcome::Stepped(_))
    }

    pub fn report(&self) -> Option<&StepReport> {
        match self {
            StepOutcome::Stepped(report) => Some(report),
            StepOutcome::NotReady { .. } => None,
        }
    }
}

/// Summary of one consumed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Index of the consumed frame
    pub frame: FrameIndex,

    /// Entities admitted at the start of the step, in admission order
    pub admitted: Vec<EntityId>,

    /// Commands the handler applied
    pub applied: usize,

    /// Commands the handler rejected (`SimError::CommandRejected`)
    pub rejected: Vec<SimError>,

    /// World checksum after the step
    pub checksum: u64,
}

/// Read-only view of the world published after each completed step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Frames consumed so far
    pub frame_counter: FrameIndex,

    /// Admitted ids in ascending order
    pub entity_ids: Vec<EntityId>,

    /// World checksum
    pub checksum: u64,
}

/// Cloneable, thread-safe access to the latest [`WorldSnapshot`].
///
/// Readers never block the stepping thread for longer than a pointer swap
/// and never observe a half-applied step.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    latest: Arc<RwLock<Arc<WorldSnapshot>>>,
}

impl SnapshotHandle {
    /// Latest published snapshot.
    pub fn latest(&self) -> Arc<WorldSnapshot> {
        let guard = self.latest.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn publish(&self, snapshot: WorldSnapshot) {
        let mut guard = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }
}

/// Deterministic lockstep simulation.
///
/// Generic over the command type `C`, the entity type `E`, the command
/// handler `H` and the physics world `P`.
pub struct Simulation<C, E, H, P: PhysicsWorld> {
    config: SimulationConfig,

    /// Incoming frames (shared with the transport)
    frames: Arc<FrameBuffer<C>>,

    /// Canonical entities and the staging queue
    registry: EntityRegistry<E, P::Body>,

    physics: P,
    rng: DeterministicRng,
    handler: H,
    state: EngineState,
    snapshots: SnapshotHandle,
}

impl<C, E, H, P> Simulation<C, E, H, P>
where
    E: LockstepEntity,
    H: CommandHandler<C, E, P>,
    P: PhysicsWorld,
{
    /// Creates an idle simulation with an empty world.
    ///
    /// Fails if `config` does not pass [`SimulationConfig::validate`].
    pub fn new(config: SimulationConfig, handler: H, physics: P) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Simulation created (tick_rate={}, frame_delay={}, seed={})",
            config.tick_rate, config.frame_delay, config.seed
        );

        let sim = Self {
            frames: Arc::new(FrameBuffer::new(config.frame_delay)),
            registry: EntityRegistry::new(),
            rng: DeterministicRng::new(config.seed),
            physics,
            handler,
            state: EngineState::Idle,
            snapshots: SnapshotHandle::default(),
            config,
        };
        sim.publish();
        Ok(sim)
    }

    /// Returns true if the next `step` would consume a frame.
    pub fn can_simulate(&self) -> bool {
        self.frames.can_pop()
    }

    /// Consumes and executes at most one frame.
    ///
    /// Call once per real-time tick at the configured rate. Invocations
    /// that find too little lookahead return [`StepOutcome::NotReady`] and
    /// change nothing.
    ///
    /// Panics raised by the handler, an entity or the physics world are not
    /// caught; a half-executed frame cannot be resumed.
    pub fn step(&mut self) -> StepOutcome {
        let (index, frame) = match self.frames.pop_ready() {
            Ok(popped) => popped,
            Err(NotReady {
                backlog,
                frame_delay,
            }) => {
                return StepOutcome::NotReady {
                    backlog,
                    frame_delay,
                }
            }
        };

        self.state = EngineState::Stepping;
        let report = self.execute(index, frame);
        self.state = EngineState::Idle;
        self.publish();

        debug!(
            "frame {} stepped: admitted={} applied={} rejected={} entities={} checksum={:#018x}",
            report.frame,
            report.admitted.len(),
            report.applied,
            report.rejected.len(),
            self.registry.len(),
            report.checksum
        );

        StepOutcome::Stepped(report)
    }

    fn execute(&mut self, index: FrameIndex, frame: Frame<C>) -> StepReport {
        // 1. Admission
        let admitted = self.registry.admit_pending(&mut self.physics, index);

        // 2. Commands
        let mut applied = 0;
        let mut rejected = Vec::new();
        {
            let mut world = World::new(index, &mut self.registry, &mut self.physics, &mut self.rng);
            for (position, command) in frame.commands().iter().enumerate() {
                match self.handler.handle(command, &mut world) {
                    Ok(()) => applied += 1,
                    Err(source) => {
                        debug!("frame {} command {} rejected: {}", index, position, source);
                        rejected.push(SimError::CommandRejected {
                            frame: index,
                            position,
                            source,
                        });
                    }
                }
            }
        }

        // 3. Entity updates
        for record in self.registry.all_mut() {
            let mut ctx = TickContext {
                frame: index,
                id: record.id(),
                body: record.body(),
                rng: &mut self.rng,
            };
            record.entity_mut().simulate(&mut ctx);
        }

        // 4. Physics
        self.physics.update();
        trace!("frame {} physics advanced ({} bodies)", index, self.physics.body_count());

        StepReport {
            frame: index,
            admitted,
            applied,
            rejected,
            checksum: self.registry.checksum(),
        }
    }

    /// Steps until no frame is ready or `max_steps` frames were consumed.
    ///
    /// Returns the number of frames consumed.
    pub fn run_pending(&mut self, max_steps: usize) -> usize {
        let mut stepped = 0;
        while stepped < max_steps && self.step().is_stepped() {
            stepped += 1;
        }
        stepped
    }

    fn publish(&self) {
        self.snapshots.publish(WorldSnapshot {
            frame_counter: self.frames.frame_counter(),
            entity_ids: self.registry.ids(),
            checksum: self.registry.checksum(),
        });
    }

    /// Handle the transport pushes frames through.
    pub fn frame_sink(&self) -> Arc<FrameBuffer<C>> {
        Arc::clone(&self.frames)
    }

    /// Pushes a frame directly (same as going through `frame_sink`).
    pub fn push_frame(&self, frame: Frame<C>) -> FrameIndex {
        self.frames.push(frame)
    }

    /// Handle producers stage new entities through.
    pub fn spawner(&self) -> Arc<SpawnQueue<E, P::Body>> {
        self.registry.spawner()
    }

    /// Stages an entity for admission at the next step.
    pub fn enqueue_entity(&self, spawn: Spawn<E, P::Body>) {
        self.registry.enqueue_pending(spawn);
    }

    /// Returns an admitted entity.
    pub fn get(&self, id: EntityId) -> Result<&E, SimError> {
        self.registry.get(id)
    }

    pub fn entities(&self) -> &EntityRegistry<E, P::Body> {
        &self.registry
    }

    /// Removes an entity and its body outside of command handling.
    ///
    /// Only deterministic if every replica removes the same entity between
    /// the same two steps.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<E, SimError> {
        let removed = self.registry.remove(id, &mut self.physics);
        self.publish();
        removed
    }

    /// Order-independent fingerprint of the current entity set.
    pub fn checksum(&self) -> u64 {
        self.registry.checksum()
    }

    /// Draws from the shared RNG.
    pub fn next_random(&mut self) -> Fix64 {
        self.rng.next()
    }

    /// Restarts the shared RNG from a new seed.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    /// Shared RNG, for draws made outside of `step` (same on every replica).
    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Consistent read of the frame counters.
    pub fn clock(&self) -> SimulationClock {
        self.frames.clock()
    }

    /// Next frame index to consume.
    pub fn frame_counter(&self) -> FrameIndex {
        self.frames.frame_counter()
    }

    /// Changes the lookahead at runtime.
    pub fn set_frame_delay(&mut self, frame_delay: u32) {
        self.config.frame_delay = frame_delay;
        self.frames.set_frame_delay(frame_delay);
    }

    /// Cloneable reader for other threads.
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{StateHash, CHECKSUM_BASE};
    use lockstep_env::{CommandError, NullPhysics};

    /// Entity that counts its own ticks.
    #[derive(Debug, PartialEq)]
    struct Ticker {
        ticks: u32,
        boost: u32,
    }

    impl Ticker {
        fn new() -> Self {
            Self { ticks: 0, boost: 0 }
        }
    }

    impl LockstepEntity for Ticker {
        fn simulate(&mut self, _ctx: &mut TickContext<'_>) {
            self.ticks += 1 + self.boost;
        }

        fn write_state(&self, hasher: &mut StateHash) {
            hasher.write_u32(self.ticks);
            hasher.write_u32(self.boost);
        }
    }

    /// Commands are entity ids to boost; records the order it saw them.
    #[derive(Default)]
    struct Booster {
        seen: Vec<(FrameIndex, u64)>,
    }

    impl CommandHandler<u64, Ticker, NullPhysics> for Booster {
        fn handle(
            &mut self,
            command: &u64,
            world: &mut World<'_, Ticker, NullPhysics>,
        ) -> Result<(), CommandError> {
            self.seen.push((world.frame(), *command));
            world.entity_mut(EntityId(*command))?.boost += 1;
            Ok(())
        }
    }

    type TestSim = Simulation<u64, Ticker, Booster, NullPhysics>;

    fn sim(frame_delay: u32) -> TestSim {
        Simulation::new(
            SimulationConfig::default().with_frame_delay(frame_delay),
            Booster::default(),
            NullPhysics::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_step_without_frames_is_noop() {
        let mut sim = sim(0);
        sim.enqueue_entity(Spawn::new(Ticker::new()));

        assert_eq!(
            sim.step(),
            StepOutcome::NotReady {
                backlog: 0,
                frame_delay: 0
            }
        );
        assert_eq!(sim.state(), EngineState::Idle);
        assert!(sim.entities().is_empty());
        assert_eq!(sim.entities().pending_len(), 1);
    }

    #[test]
    fn test_step_order_admit_then_commands_then_simulate() {
        let mut sim = sim(0);
        sim.enqueue_entity(Spawn::new(Ticker::new()));
        // The command targets the entity admitted in this same step
        sim.push_frame(Frame::new(vec![0]));

        let outcome = sim.step();
        let report = outcome.report().unwrap();

        assert_eq!(report.admitted, vec![EntityId(0)]);
        assert_eq!(report.applied, 1);
        // boost applied before simulate: 1 + 1
        assert_eq!(sim.get(EntityId(0)).unwrap().ticks, 2);
        assert_eq!(sim.frame_counter(), 1);
        assert_eq!(sim.state(), EngineState::Idle);
    }

    #[test]
    fn test_rejected_commands_do_not_abort_frame() {
        let mut sim = sim(0);
        sim.enqueue_entity(Spawn::new(Ticker::new()));
        sim.push_frame(Frame::new(vec![7, 0, 9]));

        let outcome = sim.step();
        let report = outcome.report().unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(
            report.rejected[0],
            SimError::CommandRejected {
                frame: 0,
                position: 0,
                source: CommandError::UnknownEntity(7),
            }
        );
        assert_eq!(sim.handler().seen, vec![(0, 7), (0, 0), (0, 9)]);
        assert_eq!(sim.get(EntityId(0)).unwrap().boost, 1);
    }

    #[test]
    fn test_entities_enqueued_mid_run_wait_for_next_step() {
        let mut sim = sim(0);
        sim.push_frame(Frame::empty());
        sim.push_frame(Frame::empty());

        sim.step();
        sim.enqueue_entity(Spawn::new(Ticker::new()));
        assert!(sim.get(EntityId(0)).is_err());

        let report = sim.step().report().cloned().unwrap();
        assert_eq!(report.frame, 1);
        assert_eq!(report.admitted, vec![EntityId(0)]);
    }

    #[test]
    fn test_run_pending_respects_delay_and_limit() {
        let mut sim = sim(1);
        for _ in 0..5 {
            sim.push_frame(Frame::empty());
        }

        assert_eq!(sim.run_pending(2), 2);
        // 3 buffered, delay 1: two more become consumable
        assert_eq!(sim.run_pending(usize::MAX), 2);
        assert_eq!(sim.frame_counter(), 4);
        assert!(!sim.can_simulate());
    }

    #[test]
    fn test_snapshot_published_after_step() {
        let mut sim = sim(0);
        let reader = sim.snapshot_handle();
        assert_eq!(reader.latest().checksum, CHECKSUM_BASE);

        sim.enqueue_entity(Spawn::new(Ticker::new()));
        sim.push_frame(Frame::empty());
        sim.step();

        let snap = reader.latest();
        assert_eq!(snap.frame_counter, 1);
        assert_eq!(snap.entity_ids, vec![EntityId(0)]);
        assert_eq!(snap.checksum, sim.checksum());
    }

    #[test]
    fn test_snapshot_readable_from_other_thread() {
        let mut sim = sim(0);
        sim.push_frame(Frame::empty());
        sim.step();

        let reader = sim.snapshot_handle();
        let frames = std::thread::spawn(move || reader.latest().frame_counter)
            .join()
            .unwrap();
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_set_seed_restarts_random_stream() {
        let mut sim = sim(0);
        let first = sim.next_random();
        sim.set_seed(0);
        assert_eq!(sim.next_random(), first);
    }

    #[test]
    fn test_set_frame_delay_at_runtime() {
        let mut sim = sim(3);
        sim.push_frame(Frame::empty());
        assert!(!sim.can_simulate());

        sim.set_frame_delay(0);
        assert_eq!(sim.config().frame_delay, 0);
        assert!(sim.step().is_stepped());
    }

    #[test]
    fn test_remove_entity_updates_checksum() {
        let mut sim = sim(0);
        sim.enqueue_entity(Spawn::new(Ticker::new()));
        sim.push_frame(Frame::empty());
        sim.step();
        assert_ne!(sim.checksum(), CHECKSUM_BASE);

        sim.remove_entity(EntityId(0)).unwrap();
        assert_eq!(sim.checksum(), CHECKSUM_BASE);
        assert_eq!(sim.snapshot_handle().latest().checksum, CHECKSUM_BASE);
        assert_eq!(
            sim.remove_entity(EntityId(0)),
            Err(SimError::NotFound(EntityId(0)))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero_rate = SimulationConfig::default().with_tick_rate(0);
        let result = TestSim::new(zero_rate, Booster::default(), NullPhysics::new());
        assert!(matches!(result, Err(ConfigError::InvalidTickRate(0))));

        let zero_interval =
            SimulationConfig::default().with_desync(crate::DesyncDetection::On { interval: 0 });
        let result = TestSim::new(zero_interval, Booster::default(), NullPhysics::new());
        assert!(matches!(result, Err(ConfigError::InvalidChecksumInterval)));
    }

    #[test]
    fn test_not_ready_never_reports_a_poppable_backlog() {
        let mut sim = sim(3);
        let sink = sim.frame_sink();
        let producer = std::thread::spawn(move || {
            for _ in 0..2000 {
                sink.push(Frame::empty());
            }
        });

        let mut stepped = 0;
        while stepped < 1997 {
            match sim.step() {
                StepOutcome::Stepped(_) => stepped += 1,
                StepOutcome::NotReady {
                    backlog,
                    frame_delay,
                } => {
                    assert!(backlog <= frame_delay, "backlog {} > delay {}", backlog, frame_delay);
                    std::thread::yield_now();
                }
            }
        }
        producer.join().unwrap();
        assert_eq!(
            sim.step(),
            StepOutcome::NotReady {
                backlog: 3,
                frame_delay: 3
            }
        );
    }
}
