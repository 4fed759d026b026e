//! Entity registry with staged admission.
//!
//! Producers stage entities in a [`SpawnQueue`] from any thread. The stepping
//! thread admits the whole staged batch at the start of the next step,
//! assigning sequential ids. The canonical map is only ever touched through
//! `&mut EntityRegistry`, so it needs no lock of its own.

use crate::checksum;
use crate::entity::{EntityId, EntityRecord, LockstepEntity, Spawn};
use crate::error::SimError;
use lockstep_env::{FrameIndex, PhysicsWorld};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Thread-safe staging list for entities awaiting admission.
///
/// Guarded by its own lock, independent of the frame buffer's.
pub struct SpawnQueue<E, B> {
    pending: Mutex<Vec<Spawn<E, B>>>,
}

impl<E, B> SpawnQueue<E, B> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Stages an entity. It stays invisible until the next admission.
    pub fn enqueue(&self, spawn: Spawn<E, B>) {
        self.lock().push(spawn);
    }

    /// Number of staged entities.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes the whole staged batch, leaving the queue empty.
    fn take_all(&self) -> Vec<Spawn<E, B>> {
        std::mem::take(&mut *self.lock())
    }

    // A panic while holding the lock cannot leave the Vec half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<Spawn<E, B>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E, B> Default for SpawnQueue<E, B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical set of admitted entities.
pub struct EntityRegistry<E, B> {
    /// Staged entities (shared with producers)
    pending: Arc<SpawnQueue<E, B>>,

    /// Admitted entities, iterated in id order
    entities: BTreeMap<EntityId, EntityRecord<E>>,

    /// Next id to hand out
    next_id: u64,
}

impl<E: LockstepEntity, B> EntityRegistry<E, B> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(SpawnQueue::new()),
            entities: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Returns a handle producers can stage entities through.
    pub fn spawner(&self) -> Arc<SpawnQueue<E, B>> {
        Arc::clone(&self.pending)
    }

    /// Stages an entity for admission at the next step.
    pub fn enqueue_pending(&self, spawn: Spawn<E, B>) {
        self.pending.enqueue(spawn);
    }

    /// Admits every staged entity, in staging order.
    ///
    /// Each entity gets the next sequential id; entities carrying a body have
    /// it registered with `physics`. Returns the ids handed out.
    pub fn admit_pending<P>(&mut self, physics: &mut P, frame: FrameIndex) -> Vec<EntityId>
    where
        P: PhysicsWorld<Body = B>,
    {
        let batch = self.pending.take_all();
        let mut admitted = Vec::with_capacity(batch.len());

        for Spawn { entity, body } in batch {
            let id = EntityId(self.next_id);
            self.next_id += 1;

            let handle = body.map(|b| physics.add(b));
            trace!("admitted entity {} (body: {:?}) at frame {}", id, handle, frame);

            self.entities
                .insert(id, EntityRecord::new(id, entity, handle, frame));
            admitted.push(id);
        }

        admitted
    }

    /// Returns the entity for an id.
    pub fn get(&self, id: EntityId) -> Result<&E, SimError> {
        self.record(id).map(EntityRecord::entity)
    }

    /// Returns the entity for an id, mutably.
    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut E, SimError> {
        self.entities
            .get_mut(&id)
            .map(EntityRecord::entity_mut)
            .ok_or(SimError::NotFound(id))
    }

    /// Returns the full record (id, body handle, admission frame).
    pub fn record(&self, id: EntityId) -> Result<&EntityRecord<E>, SimError> {
        self.entities.get(&id).ok_or(SimError::NotFound(id))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All admitted entities in ascending id (= admission) order.
    pub fn all(&self) -> impl Iterator<Item = &EntityRecord<E>> {
        self.entities.values()
    }

    pub(crate) fn all_mut(&mut self) -> impl Iterator<Item = &mut EntityRecord<E>> {
        self.entities.values_mut()
    }

    /// Admitted ids in ascending order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Removes an admitted entity and its body. The id is never handed out again.
    pub fn remove<P>(&mut self, id: EntityId, physics: &mut P) -> Result<E, SimError>
    where
        P: PhysicsWorld<Body = B>,
    {
        let record = self.entities.remove(&id).ok_or(SimError::NotFound(id))?;
        let (entity, body) = record.into_parts();
        if let Some(handle) = body {
            physics.remove(handle);
        }
        trace!("removed entity {}", id);
        Ok(entity)
    }

    /// Number of admitted entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities staged for the next admission.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The id the next admitted entity will receive.
    pub fn next_id(&self) -> EntityId {
        EntityId(self.next_id)
    }

    /// Order-independent fingerprint of every admitted entity.
    pub fn checksum(&self) -> u64 {
        checksum::combine(self.entities.values().map(EntityRecord::checksum_contribution))
    }
}

impl<E: LockstepEntity, B> Default for EntityRegistry<E, B> {
    fn default() -> Self {
        Self::new()
    }
}
