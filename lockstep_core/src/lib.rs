//! Lockstep Core - Deterministic Frame-Driven Simulation
//!
//! Every replica of a lockstep session runs the same [`Simulation`] over the
//! same agreed frames and ends each step with bit-identical state.
//!
//! # Step pipeline
//!
//! ```text
//!  transport ──push──► FrameBuffer ──try_pop (delay)──┐
//!  producers ──enqueue──► SpawnQueue ──┐              │
//!                                      ▼              ▼
//!                            ┌──────── step() ────────────┐
//!                            │ 1. admit staged entities   │
//!                            │ 2. apply frame commands    │
//!                            │ 3. simulate (id order)     │
//!                            │ 4. one physics tick        │
//!                            └─────────────┬──────────────┘
//!                                          ▼
//!                              WorldSnapshot + checksum
//! ```
//!
//! # Determinism
//!
//! - All arithmetic on simulated state is [`Fix64`] fixed point
//! - All randomness comes from one seeded [`DeterministicRng`]
//! - Entities are iterated in ascending [`EntityId`] order
//! - The [`checksum`](Simulation::checksum) is content-derived and
//!   independent of iteration order

pub mod checksum;
pub mod config;
pub mod desync;
pub mod entity;
pub mod error;
pub mod fixed;
pub mod frame_buffer;
pub mod handler;
pub mod registry;
pub mod rng;
pub mod simulation;

pub use checksum::{StateHash, CHECKSUM_BASE};
pub use config::{SimulationConfig, DEFAULT_TICK_RATE};
pub use desync::{DesyncDetection, DesyncDetector, DesyncReport};
pub use entity::{EntityId, EntityRecord, LockstepEntity, Spawn, TickContext};
pub use error::{ConfigError, SimError};
pub use fixed::Fix64;
pub use frame_buffer::{FrameBuffer, NotReady, SimulationClock};
pub use handler::{CommandHandler, World};
pub use registry::{EntityRegistry, SpawnQueue};
pub use rng::{derive_seed, DeterministicRng};
pub use simulation::{
    EngineState, Simulation, SnapshotHandle, StepOutcome, StepReport, WorldSnapshot,
};

pub use lockstep_env::{BodyHandle, Frame, FrameIndex, PhysicsWorld};
