//! Lockstep Deterministic Simulation Harness
//!
//! Runs several replicas of the same lockstep simulation side by side and
//! checks that they stay bit-identical while the network misbehaves.
//!
//! # Controlled non-determinism
//!
//! - **Time**: a virtual clock advanced one tick at a time
//! - **Network**: per-link latency, jitter and partitions (delay only)
//! - **Randomness**: every stream derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  InputScript ──► sequencer ──► SimNetwork (faults)       │
//! │                                   │    │    │            │
//! │                              ┌────▼┐ ┌─▼──┐ ┌▼───┐       │
//! │                              │ R0  │ │ R1 │ │ R2 │ ...   │
//! │                              └──┬──┘ └─┬──┘ └─┬──┘       │
//! │                                 └──────┴──────┘          │
//! │                          checkpoint checksum exchange    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lockstep_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 4).run(ScenarioId::Partition)?;
//! assert!(result.passed);
//! ```

pub mod arena;
mod context;
pub mod error;
mod exporter;
mod network;
pub mod physics;
mod replica;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use error::HarnessError;
pub use exporter::{ChecksumTrace, TracePoint};
pub use network::{RelayStats, SimNetwork, SimNetworkController};
pub use replica::{ArenaSimulation, Checkpoint, Replica, ReplicaStats};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};
