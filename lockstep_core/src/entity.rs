//! Entities simulated by the lockstep core.

use crate::checksum::StateHash;
use crate::rng::DeterministicRng;
use lockstep_env::{BodyHandle, FrameIndex};
use serde::{Deserialize, Serialize};

/// Identifier assigned to an entity at admission.
///
/// Ids come from a per-registry counter, start at 0, grow by one per
/// admitted entity and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Behaviour every simulated entity provides to the step engine.
///
/// # Determinism
///
/// `simulate` runs once per frame for every admitted entity, in ascending
/// id order. It may only read its own state, the [`TickContext`], and draw
/// from the shared RNG. `write_state` must feed every field that can differ
/// between replicas into the hasher, in a fixed order, using
/// platform-independent encodings (the `write_*` helpers of [`StateHash`]).
pub trait LockstepEntity: Send {
    /// Per-tick update.
    fn simulate(&mut self, ctx: &mut TickContext<'_>);

    /// Feeds the entity's deterministic state into a checksum hasher.
    fn write_state(&self, hasher: &mut StateHash);
}

/// What an entity sees during its per-tick update.
pub struct TickContext<'a> {
    /// Frame currently being stepped.
    pub frame: FrameIndex,

    /// Id of the entity being updated.
    pub id: EntityId,

    /// Physics body owned by the entity, if any.
    pub body: Option<BodyHandle>,

    /// Shared deterministic RNG.
    pub rng: &'a mut DeterministicRng,
}

/// A request to admit an entity, optionally with a physical body.
///
/// The body is handed to the physics world at admission; the entity keeps
/// only the resulting [`BodyHandle`].
#[derive(Debug, Clone)]
pub struct Spawn<E, B> {
    pub entity: E,
    pub body: Option<B>,
}

impl<E, B> Spawn<E, B> {
    /// Spawns an entity without a body.
    pub fn new(entity: E) -> Self {
        Self { entity, body: None }
    }

    /// Spawns an entity together with its physical body.
    pub fn with_body(entity: E, body: B) -> Self {
        Self {
            entity,
            body: Some(body),
        }
    }
}

/// An admitted entity and the bookkeeping the registry keeps for it.
#[derive(Debug, Clone)]
pub struct EntityRecord<E> {
    id: EntityId,
    entity: E,
    body: Option<BodyHandle>,
    admitted_at: FrameIndex,
}

impl<E: LockstepEntity> EntityRecord<E> {
    pub(crate) fn new(
        id: EntityId,
        entity: E,
        body: Option<BodyHandle>,
        admitted_at: FrameIndex,
    ) -> Self {
        Self {
            id,
            entity,
            body,
            admitted_at,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    /// Handle of the entity's body in the physics world.
    pub fn body(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Frame during which the entity was admitted.
    pub fn admitted_at(&self) -> FrameIndex {
        self.admitted_at
    }

    pub(crate) fn into_parts(self) -> (E, Option<BodyHandle>) {
        (self.entity, self.body)
    }

    /// This entity's share of the world checksum.
    pub fn checksum_contribution(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.id.0);
        hasher.write_u32(self.admitted_at);
        match self.body {
            Some(handle) => {
                hasher.write_bool(true);
                hasher.write_u32(handle.raw());
            }
            None => hasher.write_bool(false),
        }
        self.entity.write_state(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    impl LockstepEntity for Counter {
        fn simulate(&mut self, _ctx: &mut TickContext<'_>) {
            self.0 += 1;
        }

        fn write_state(&self, hasher: &mut StateHash) {
            hasher.write_u32(self.0);
        }
    }

    #[test]
    fn test_contribution_tracks_state() {
        let mut record = EntityRecord::new(EntityId(0), Counter(0), None, 0);
        let before = record.checksum_contribution();

        let mut rng = DeterministicRng::new(0);
        let mut ctx = TickContext {
            frame: 0,
            id: record.id(),
            body: None,
            rng: &mut rng,
        };
        record.entity_mut().simulate(&mut ctx);

        assert_ne!(before, record.checksum_contribution());
    }

    #[test]
    fn test_contribution_includes_id() {
        let a = EntityRecord::new(EntityId(0), Counter(5), None, 0);
        let b = EntityRecord::new(EntityId(1), Counter(5), None, 0);
        assert_ne!(a.checksum_contribution(), b.checksum_contribution());
    }

    #[test]
    fn test_spawn_body_is_optional() {
        let plain: Spawn<Counter, u8> = Spawn::new(Counter(0));
        assert!(plain.body.is_none());
        let with = Spawn::with_body(Counter(0), 3u8);
        assert_eq!(with.body, Some(3));
    }
}
