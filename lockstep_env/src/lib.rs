//! Lockstep Environment Boundary
//!
//! This crate holds the contracts between the deterministic lockstep core
//! and the collaborators it does not own:
//! - **Transport**: delivers agreed [`Frame`]s through a [`FrameSink`]
//! - **Physics**: a [`PhysicsWorld`] advanced one fixed tick per frame
//! - **Command handling**: rejections are reported as [`CommandError`]
//!
//! # Determinism
//!
//! The core is only as deterministic as its collaborators. Every
//! implementation of these traits must produce identical results on every
//! replica for identical input sequences.
//!
//! # Example
//!
//! ```ignore
//! use lockstep_env::{Frame, FrameSink};
//!
//! fn on_agreed(sink: &dyn FrameSink<MyCommand>, commands: Vec<MyCommand>) {
//!     let index = sink.push(Frame::new(commands));
//!     tracing::trace!("queued frame {}", index);
//! }
//! ```

mod error;
mod network;
mod physics;
mod types;

pub use error::{CommandError, NetError};
pub use network::{FrameSink, NetworkController};
pub use physics::{BodyHandle, NullPhysics, PhysicsWorld};
pub use types::{Frame, FrameIndex, PeerId};
