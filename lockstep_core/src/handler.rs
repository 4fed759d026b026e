//! Command dispatch boundary.

use crate::entity::{EntityId, EntityRecord, LockstepEntity, Spawn};
use crate::registry::EntityRegistry;
use crate::rng::DeterministicRng;
use lockstep_env::{CommandError, FrameIndex, PhysicsWorld};

/// Applies agreed commands to the simulation.
///
/// This is the only way external input changes simulated state.
///
/// # Contract
///
/// - Deterministic: the same command sequence has the same effect on every
///   replica.
/// - Best effort: a command that cannot be applied is rejected with a
///   [`CommandError`] and must leave the world untouched. The engine logs
///   the rejection and moves on to the next command; it never rolls back.
pub trait CommandHandler<C, E, P: PhysicsWorld>: Send {
    fn handle(&mut self, command: &C, world: &mut World<'_, E, P>) -> Result<(), CommandError>;
}

/// Mutable view of the simulation handed to a [`CommandHandler`].
pub struct World<'a, E, P: PhysicsWorld> {
    frame: FrameIndex,
    entities: &'a mut EntityRegistry<E, P::Body>,
    physics: &'a mut P,
    rng: &'a mut DeterministicRng,
}

impl<'a, E: LockstepEntity, P: PhysicsWorld> World<'a, E, P> {
    pub(crate) fn new(
        frame: FrameIndex,
        entities: &'a mut EntityRegistry<E, P::Body>,
        physics: &'a mut P,
        rng: &'a mut DeterministicRng,
    ) -> Self {
        Self {
            frame,
            entities,
            physics,
            rng,
        }
    }

    /// Index of the frame whose commands are being applied.
    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    pub fn entity(&self, id: EntityId) -> Result<&E, CommandError> {
        self.entities
            .get(id)
            .map_err(|_| CommandError::UnknownEntity(id.0))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Result<&mut E, CommandError> {
        self.entities
            .get_mut(id)
            .map_err(|_| CommandError::UnknownEntity(id.0))
    }

    pub fn record(&self, id: EntityId) -> Result<&EntityRecord<E>, CommandError> {
        self.entities
            .record(id)
            .map_err(|_| CommandError::UnknownEntity(id.0))
    }

    /// Read access to the whole registry.
    pub fn entities(&self) -> &EntityRegistry<E, P::Body> {
        &*self.entities
    }

    /// Stages a new entity. It is admitted at the start of the next step.
    pub fn spawn(&mut self, spawn: Spawn<E, P::Body>) {
        self.entities.enqueue_pending(spawn);
    }

    /// Removes an entity and its body right away.
    pub fn despawn(&mut self, id: EntityId) -> Result<E, CommandError> {
        self.entities
            .remove(id, &mut *self.physics)
            .map_err(|_| CommandError::UnknownEntity(id.0))
    }

    pub fn physics(&self) -> &P {
        &*self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut *self.physics
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut *self.rng
    }
}
