//! End-to-end behaviour of the step engine across threads and replicas.

use lockstep_core::{
    CommandHandler, EngineState, EntityId, Fix64, LockstepEntity, SimError, Simulation,
    SimulationConfig, Spawn, StateHash, StepOutcome, TickContext, World, CHECKSUM_BASE,
};
use lockstep_env::{CommandError, Frame, FrameSink, NullPhysics};
use std::sync::Arc;

/// Moves along one axis and jitters by a random amount every tick.
#[derive(Debug, Clone, PartialEq)]
struct Walker {
    position: Fix64,
    velocity: Fix64,
}

impl Walker {
    fn at(position: i32) -> Self {
        Self {
            position: Fix64::from_int(position),
            velocity: Fix64::ZERO,
        }
    }
}

impl LockstepEntity for Walker {
    fn simulate(&mut self, ctx: &mut TickContext<'_>) {
        let jitter = ctx.rng.next_range(-Fix64::HALF, Fix64::HALF);
        self.position += self.velocity + jitter;
    }

    fn write_state(&self, hasher: &mut StateHash) {
        hasher.write_fix64(self.position);
        hasher.write_fix64(self.velocity);
    }
}

#[derive(Debug, Clone)]
enum Cmd {
    Spawn(i32),
    Push(u64, i32),
    Remove(u64),
}

#[derive(Default)]
struct WalkerHandler;

impl CommandHandler<Cmd, Walker, NullPhysics> for WalkerHandler {
    fn handle(
        &mut self,
        command: &Cmd,
        world: &mut World<'_, Walker, NullPhysics>,
    ) -> Result<(), CommandError> {
        match *command {
            Cmd::Spawn(at) => world.spawn(Spawn::new(Walker::at(at))),
            Cmd::Push(id, dv) => world.entity_mut(EntityId(id))?.velocity += Fix64::from_int(dv),
            Cmd::Remove(id) => {
                world.despawn(EntityId(id))?;
            }
        }
        Ok(())
    }
}

type WalkerSim = Simulation<Cmd, Walker, WalkerHandler, NullPhysics>;

fn replica(seed: u64, frame_delay: u32) -> WalkerSim {
    let config = SimulationConfig::default()
        .with_seed(seed)
        .with_frame_delay(frame_delay);
    Simulation::new(config, WalkerHandler, NullPhysics::new()).unwrap()
}

fn script() -> Vec<Frame<Cmd>> {
    vec![
        Frame::new(vec![Cmd::Spawn(0), Cmd::Spawn(10)]),
        Frame::new(vec![Cmd::Push(0, 1)]),
        Frame::new(vec![Cmd::Push(1, -2), Cmd::Spawn(5)]),
        Frame::empty(),
        Frame::new(vec![Cmd::Remove(0), Cmd::Push(2, 3)]),
        Frame::new(vec![Cmd::Push(0, 1)]),
        Frame::empty(),
    ]
}

#[test]
fn empty_frame_leaves_base_checksum() {
    let mut sim = replica(0, 0);
    sim.push_frame(Frame::empty());

    assert_eq!(sim.state(), EngineState::Idle);
    let outcome = sim.step();
    assert_eq!(sim.state(), EngineState::Idle);

    let report = outcome.report().expect("frame should be consumed");
    assert!(report.admitted.is_empty());
    assert_eq!(sim.frame_counter(), 1);
    assert_eq!(sim.checksum(), CHECKSUM_BASE);
    assert_eq!(report.checksum, 3);
}

#[test]
fn staged_entity_is_visible_to_same_frame_commands() {
    let mut sim = replica(0, 0);
    sim.enqueue_entity(Spawn::new(Walker::at(4)));
    sim.push_frame(Frame::new(vec![Cmd::Push(0, 2)]));

    let report = sim.step().report().cloned().unwrap();

    assert_eq!(report.applied, 1);
    assert!(report.rejected.is_empty());
    assert_eq!(sim.get(EntityId(0)).unwrap().velocity, Fix64::from_int(2));
    assert_ne!(sim.checksum(), CHECKSUM_BASE);
}

#[test]
fn frame_delay_holds_back_consumption() {
    let mut sim = replica(0, 2);
    sim.push_frame(Frame::empty());
    sim.push_frame(Frame::empty());

    assert_eq!(
        sim.step(),
        StepOutcome::NotReady {
            backlog: 2,
            frame_delay: 2
        }
    );
    assert_eq!(sim.frame_counter(), 0);

    sim.push_frame(Frame::empty());
    let report = sim.step().report().cloned().unwrap();
    assert_eq!(report.frame, 0);
    assert!(!sim.can_simulate());
}

#[test]
fn command_spawn_is_admitted_next_step() {
    let mut sim = replica(0, 0);
    sim.push_frame(Frame::new(vec![Cmd::Spawn(1)]));
    sim.push_frame(Frame::empty());

    sim.step();
    assert!(sim.entities().is_empty());
    assert_eq!(sim.entities().pending_len(), 1);

    let report = sim.step().report().cloned().unwrap();
    assert_eq!(report.admitted, vec![EntityId(0)]);
}

#[test]
fn rejected_command_reports_position() {
    let mut sim = replica(0, 0);
    sim.push_frame(Frame::new(vec![Cmd::Spawn(0), Cmd::Push(42, 1)]));

    let report = sim.step().report().cloned().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(
        report.rejected,
        vec![SimError::CommandRejected {
            frame: 0,
            position: 1,
            source: CommandError::UnknownEntity(42),
        }]
    );
}

#[test]
fn replicas_with_same_inputs_agree_every_frame() {
    let mut a = replica(7, 1);
    let mut b = replica(7, 1);

    for frame in script() {
        a.push_frame(frame.clone());
        b.push_frame(frame);
        let ra = a.step();
        let rb = b.step();
        assert_eq!(ra, rb);
    }

    assert_eq!(a.checksum(), b.checksum());
    assert_eq!(a.entities().ids(), b.entities().ids());
    assert_eq!(a.rng().draws(), b.rng().draws());
}

#[test]
fn different_seeds_diverge() {
    let mut a = replica(1, 0);
    let mut b = replica(2, 0);

    for frame in script() {
        a.push_frame(frame.clone());
        b.push_frame(frame);
    }
    a.run_pending(usize::MAX);
    b.run_pending(usize::MAX);

    assert_eq!(a.entities().ids(), b.entities().ids());
    assert_ne!(a.checksum(), b.checksum());
}

#[test]
fn transport_and_spawner_threads_feed_the_engine() {
    let mut sim = replica(3, 0);
    let sink: Arc<dyn FrameSink<Cmd>> = sim.frame_sink();
    let spawner = sim.spawner();

    let transport = std::thread::spawn(move || {
        for _ in 0..50 {
            sink.push(Frame::empty());
        }
    });
    let producers: Vec<_> = (0..4)
        .map(|t| {
            let spawner = Arc::clone(&spawner);
            std::thread::spawn(move || {
                for i in 0..25 {
                    spawner.enqueue(Spawn::new(Walker::at(t * 100 + i)));
                }
            })
        })
        .collect();

    transport.join().unwrap();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut consumed = 0;
    while let StepOutcome::Stepped(_) = sim.step() {
        consumed += 1;
    }

    assert_eq!(consumed, 50);
    assert_eq!(sim.entities().len(), 100);
    assert_eq!(
        sim.entities().ids(),
        (0..100).map(EntityId).collect::<Vec<_>>()
    );
    assert_eq!(sim.entities().pending_len(), 0);
}

#[test]
fn snapshot_tracks_engine_from_reader_thread() {
    let mut sim = replica(0, 0);
    let reader = sim.snapshot_handle();
    sim.enqueue_entity(Spawn::new(Walker::at(0)));
    for _ in 0..3 {
        sim.push_frame(Frame::empty());
    }
    sim.run_pending(usize::MAX);

    let expected = sim.checksum();
    let seen = std::thread::spawn(move || reader.latest())
        .join()
        .unwrap();

    assert_eq!(seen.frame_counter, 3);
    assert_eq!(seen.entity_ids, vec![EntityId(0)]);
    assert_eq!(seen.checksum, expected);
}
