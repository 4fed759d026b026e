//! Arena rules: the game the harness runs on every replica.
//!
//! Units are spawned with a body in the [`KinematicWorld`], steered and
//! damaged by commands, and age and regenerate on their own each tick.

use crate::physics::{Body, FixVec2, KinematicWorld};
use lockstep_core::{
    CommandHandler, DeterministicRng, EntityId, Fix64, LockstepEntity, Spawn, StateHash,
    TickContext, World,
};
use lockstep_env::CommandError;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Health a unit spawns with.
pub const MAX_HEALTH: i32 = 100;

/// Half the arena side length, in world units.
pub const ARENA_HALF_EXTENT: i32 = 500;

/// A simulated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub team: u8,
    pub health: i32,

    /// Ticks since admission
    pub age: u32,
}

impl Unit {
    pub fn new(team: u8) -> Self {
        Self {
            team,
            health: MAX_HEALTH,
            age: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

impl LockstepEntity for Unit {
    fn simulate(&mut self, ctx: &mut TickContext<'_>) {
        self.age += 1;
        // One in eight ticks, a wounded unit regains a point
        if self.health < MAX_HEALTH && ctx.rng.next_int(8) == 0 {
            self.health += 1;
        }
    }

    fn write_state(&self, hasher: &mut StateHash) {
        hasher.write_u8(self.team);
        hasher.write_i32(self.health);
        hasher.write_u32(self.age);
    }
}

/// Player input understood by the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaCommand {
    Spawn {
        team: u8,
        position: FixVec2,
        velocity: FixVec2,
    },
    Move {
        id: u64,
        velocity: FixVec2,
    },
    Damage {
        id: u64,
        amount: i32,
    },
    Despawn {
        id: u64,
    },
    Noop,
}

/// Counters of what the handler applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    pub spawned: u64,
    pub moved: u64,
    pub damaged: u64,
    pub killed: u64,
    pub despawned: u64,
}

/// Applies [`ArenaCommand`]s.
#[derive(Debug, Default)]
pub struct ArenaHandler {
    stats: ArenaStats,
}

impl ArenaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }
}

fn inside_arena(position: FixVec2) -> bool {
    let limit = Fix64::from_int(ARENA_HALF_EXTENT);
    position.x.abs() <= limit && position.y.abs() <= limit
}

impl CommandHandler<ArenaCommand, Unit, KinematicWorld> for ArenaHandler {
    fn handle(
        &mut self,
        command: &ArenaCommand,
        world: &mut World<'_, Unit, KinematicWorld>,
    ) -> Result<(), CommandError> {
        match *command {
            ArenaCommand::Spawn {
                team,
                position,
                velocity,
            } => {
                if !inside_arena(position) {
                    return Err(CommandError::invalid("spawn position outside arena"));
                }
                world.spawn(Spawn::with_body(Unit::new(team), Body::moving(position, velocity)));
                self.stats.spawned += 1;
            }
            ArenaCommand::Move { id, velocity } => {
                let handle = world
                    .record(EntityId(id))?
                    .body()
                    .ok_or_else(|| CommandError::rejected(format!("entity {} has no body", id)))?;
                let body = world
                    .physics_mut()
                    .body_mut(handle)
                    .ok_or_else(|| CommandError::rejected(format!("body {} missing", handle)))?;
                body.velocity = velocity;
                self.stats.moved += 1;
            }
            ArenaCommand::Damage { id, amount } => {
                if amount <= 0 {
                    return Err(CommandError::invalid(format!("damage {}", amount)));
                }
                let unit = world.entity_mut(EntityId(id))?;
                unit.health -= amount;
                self.stats.damaged += 1;
                if !unit.is_alive() {
                    world.despawn(EntityId(id))?;
                    self.stats.killed += 1;
                    trace!("frame {} unit #{} killed", world.frame(), id);
                }
            }
            ArenaCommand::Despawn { id } => {
                world.despawn(EntityId(id))?;
                self.stats.despawned += 1;
            }
            ArenaCommand::Noop => {}
        }
        Ok(())
    }
}

/// Command mix produced by an [`InputScript`], as probabilities per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputProfile {
    pub spawn: Fix64,
    pub steer: Fix64,
    pub damage: Fix64,
    pub despawn: Fix64,

    /// Upper bound on commands in one frame
    pub max_commands: u32,
}

impl InputProfile {
    /// A few commands per frame, balanced between kinds.
    pub fn skirmish() -> Self {
        Self {
            spawn: Fix64::from_ratio(1, 4),
            steer: Fix64::from_ratio(1, 2),
            damage: Fix64::from_ratio(1, 3),
            despawn: Fix64::from_ratio(1, 20),
            max_commands: 4,
        }
    }

    /// Mostly spawns, many per frame.
    pub fn storm() -> Self {
        Self {
            spawn: Fix64::from_ratio(9, 10),
            steer: Fix64::from_ratio(1, 4),
            damage: Fix64::from_ratio(1, 10),
            despawn: Fix64::ZERO,
            max_commands: 12,
        }
    }
}

impl Default for InputProfile {
    fn default() -> Self {
        Self::skirmish()
    }
}

/// Generates the agreed input stream, standing in for the players.
///
/// Tracks the ids its spawns will receive so later commands can target
/// them. The guess goes stale when units die, which exercises rejections.
#[derive(Debug, Clone)]
pub struct InputScript {
    rng: DeterministicRng,
    profile: InputProfile,

    /// Ids expected to be live
    known: Vec<u64>,

    /// Spawn commands issued so far (the next expected id)
    issued: u64,
}

impl InputScript {
    pub fn new(seed: u64, profile: InputProfile) -> Self {
        Self {
            rng: DeterministicRng::new(seed),
            profile,
            known: Vec::new(),
            issued: 0,
        }
    }

    /// Commands for the next frame.
    pub fn next_frame(&mut self) -> Vec<ArenaCommand> {
        let count = self.rng.next_int(self.profile.max_commands + 1);
        (0..count).map(|_| self.next_command()).collect()
    }

    fn next_command(&mut self) -> ArenaCommand {
        let p = self.profile;
        if self.known.is_empty() || self.rng.next_bool(p.spawn) {
            return self.spawn();
        }
        let target = match self.rng.pick(&self.known) {
            Some(&id) => id,
            None => return ArenaCommand::Noop,
        };
        if self.rng.next_bool(p.steer) {
            ArenaCommand::Move {
                id: target,
                velocity: self.velocity(),
            }
        } else if self.rng.next_bool(p.damage) {
            ArenaCommand::Damage {
                id: target,
                amount: 10 + self.rng.next_int(40) as i32,
            }
        } else if self.rng.next_bool(p.despawn) {
            self.known.retain(|&id| id != target);
            ArenaCommand::Despawn { id: target }
        } else {
            ArenaCommand::Noop
        }
    }

    fn spawn(&mut self) -> ArenaCommand {
        let extent = Fix64::from_int(ARENA_HALF_EXTENT);
        let position = FixVec2::new(
            self.rng.next_range(-extent, extent),
            self.rng.next_range(-extent, extent),
        );
        let command = ArenaCommand::Spawn {
            team: self.rng.next_int(4) as u8,
            position,
            velocity: self.velocity(),
        };
        self.known.push(self.issued);
        self.issued += 1;
        command
    }

    fn velocity(&mut self) -> FixVec2 {
        let max = Fix64::from_int(30);
        FixVec2::new(self.rng.next_range(-max, max), self.rng.next_range(-max, max))
    }

    /// Spawn commands issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}
