//! Integration contract for the physics world driven by the lockstep core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Non-owning reference to a body registered with a physics world.
///
/// The entity registry keeps the handle next to the entity that owns the
/// body; the physics world keeps the body itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

impl BodyHandle {
    /// Returns the raw handle value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "body#{}", self.0)
    }
}

/// A rigid-body engine advanced once per lockstep frame.
///
/// # Determinism
///
/// Given the same sequence of `add`, `remove` and `update` calls, every
/// replica's world must end in the same state on every platform. The core
/// relies on this and does not verify it.
///
/// # Time Step
///
/// `update` always advances exactly one fixed tick. The tick length is part
/// of the world's own configuration (derived from the simulation frame rate),
/// never a variable argument.
pub trait PhysicsWorld: Send {
    /// Body description handed over at entity admission.
    type Body;

    /// Registers a body and returns its handle.
    fn add(&mut self, body: Self::Body) -> BodyHandle;

    /// Removes a body, returning it if the handle was known.
    fn remove(&mut self, handle: BodyHandle) -> Option<Self::Body>;

    /// Advances the world by one fixed tick.
    fn update(&mut self);

    /// Number of bodies currently tracked.
    fn body_count(&self) -> usize;
}

/// Physics world for simulations without real bodies.
///
/// Bodies are unit values; only their handles are tracked.
#[derive(Debug, Default, Clone)]
pub struct NullPhysics {
    added: u32,
    live: BTreeSet<u32>,
}

impl NullPhysics {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhysicsWorld for NullPhysics {
    type Body = ();

    fn add(&mut self, _body: ()) -> BodyHandle {
        let handle = BodyHandle(self.added);
        self.added += 1;
        self.live.insert(handle.0);
        handle
    }

    fn remove(&mut self, handle: BodyHandle) -> Option<()> {
        self.live.remove(&handle.0).then_some(())
    }

    fn update(&mut self) {}

    fn body_count(&self) -> usize {
        self.live.len()
    }
}
