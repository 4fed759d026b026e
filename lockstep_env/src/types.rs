//! Common types shared across the lockstep boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of a frame in the agreed command stream.
///
/// Indices are assigned by the frame buffer at push time and grow by one per
/// frame, starting at zero.
pub type FrameIndex = u32;

/// Identifier for a lockstep participant (peer/replica).
///
/// Derived from a seed so that every run of a session names its peers the
/// same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a deterministic PeerId from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One tick's worth of commands agreed by every participant.
///
/// The command type is opaque to the core: it only guarantees that commands
/// reach the handler in the order listed here. A frame is immutable once it
/// has been pushed into a frame buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame<C> {
    commands: Vec<C>,
}

impl<C> Frame<C> {
    /// Creates a frame from an ordered command list.
    pub fn new(commands: Vec<C>) -> Self {
        Self { commands }
    }

    /// Creates a frame that carries no commands.
    pub fn empty() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Commands in agreed order.
    pub fn commands(&self) -> &[C] {
        &self.commands
    }

    /// Number of commands in the frame.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the frame carries no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Consumes the frame, returning its commands.
    pub fn into_commands(self) -> Vec<C> {
        self.commands
    }
}

impl<C> Default for Frame<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> From<Vec<C>> for Frame<C> {
    fn from(commands: Vec<C>) -> Self {
        Self::new(commands)
    }
}
