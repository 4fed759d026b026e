//! Fixed-point kinematic physics for the arena.
//!
//! Bodies move at constant velocity and bounce off the arena walls. All
//! math is [`Fix64`], so every replica integrates identically.

use lockstep_core::{Fix64, StateHash};
use lockstep_env::{BodyHandle, PhysicsWorld};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, Mul, Neg, Sub};

/// 2D vector in fixed point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixVec2 {
    pub x: Fix64,
    pub y: Fix64,
}

impl FixVec2 {
    pub const ZERO: FixVec2 = FixVec2 {
        x: Fix64::ZERO,
        y: Fix64::ZERO,
    };

    pub fn new(x: Fix64, y: Fix64) -> Self {
        Self { x, y }
    }

    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fix64::from_int(x), Fix64::from_int(y))
    }
}

impl Add for FixVec2 {
    type Output = FixVec2;

    fn add(self, rhs: FixVec2) -> FixVec2 {
        FixVec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for FixVec2 {
    type Output = FixVec2;

    fn sub(self, rhs: FixVec2) -> FixVec2 {
        FixVec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<Fix64> for FixVec2 {
    type Output = FixVec2;

    fn mul(self, rhs: Fix64) -> FixVec2 {
        FixVec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for FixVec2 {
    type Output = FixVec2;

    fn neg(self) -> FixVec2 {
        FixVec2::new(-self.x, -self.y)
    }
}

/// A point body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub position: FixVec2,
    pub velocity: FixVec2,
}

impl Body {
    pub fn at(position: FixVec2) -> Self {
        Self {
            position,
            velocity: FixVec2::ZERO,
        }
    }

    pub fn moving(position: FixVec2, velocity: FixVec2) -> Self {
        Self { position, velocity }
    }
}

/// Constant-velocity world bounded by a square arena centred on the origin.
#[derive(Debug, Clone)]
pub struct KinematicWorld {
    bodies: BTreeMap<BodyHandle, Body>,
    next_handle: u32,

    /// Seconds per tick
    dt: Fix64,

    /// Half the arena side length
    half_extent: Fix64,

    ticks: u64,
}

impl KinematicWorld {
    /// Creates an empty world advancing `dt` seconds per update.
    pub fn new(dt: Fix64, half_extent: Fix64) -> Self {
        Self {
            bodies: BTreeMap::new(),
            next_handle: 0,
            dt,
            half_extent: half_extent.abs(),
            ticks: 0,
        }
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(&handle)
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(&handle)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &Body)> {
        self.bodies.iter().map(|(handle, body)| (*handle, body))
    }

    pub fn dt(&self) -> Fix64 {
        self.dt
    }

    pub fn half_extent(&self) -> Fix64 {
        self.half_extent
    }

    /// Updates applied so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Hash of every body's state in handle order.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.ticks);
        for (handle, body) in &self.bodies {
            hasher.write_u32(handle.raw());
            hasher.write_fix64(body.position.x);
            hasher.write_fix64(body.position.y);
            hasher.write_fix64(body.velocity.x);
            hasher.write_fix64(body.velocity.y);
        }
        hasher.finish()
    }
}

/// Reflects one axis off the walls at `-limit` and `limit`.
fn bounce(position: &mut Fix64, velocity: &mut Fix64, limit: Fix64) {
    if *position > limit {
        *position = limit - (*position - limit);
        *velocity = -*velocity;
    } else if *position < -limit {
        *position = -limit - (*position + limit);
        *velocity = -*velocity;
    }
    // A body moving faster than the arena is wide still ends inside
    *position = (*position).clamp(-limit, limit);
}

impl PhysicsWorld for KinematicWorld {
    type Body = Body;

    fn add(&mut self, body: Body) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        self.bodies.insert(handle, body);
        handle
    }

    fn remove(&mut self, handle: BodyHandle) -> Option<Body> {
        self.bodies.remove(&handle)
    }

    fn update(&mut self) {
        let dt = self.dt;
        let limit = self.half_extent;
        for body in self.bodies.values_mut() {
            body.position = body.position + body.velocity * dt;
            bounce(&mut body.position.x, &mut body.velocity.x, limit);
            bounce(&mut body.position.y, &mut body.velocity.y, limit);
        }
        self.ticks += 1;
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
