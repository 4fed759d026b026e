//! Error types for the lockstep core.

use crate::entity::EntityId;
use lockstep_env::{CommandError, FrameIndex};
use thiserror::Error;

/// Errors surfaced by the simulation core.
///
/// "Not ready" is deliberately absent: an empty frame buffer is the normal
/// back-pressure signal and is reported as `None` / [`StepOutcome::NotReady`].
///
/// [`StepOutcome::NotReady`]: crate::StepOutcome::NotReady
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Entity id is unknown or not admitted yet
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// The command handler refused a command
    #[error("Command {position} of frame {frame} rejected: {source}")]
    CommandRejected {
        frame: FrameIndex,
        position: usize,
        #[source]
        source: CommandError,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Tick rate must be positive, got {0}")]
    InvalidTickRate(u32),

    #[error("Checksum interval must be positive when desync detection is on")]
    InvalidChecksumInterval,

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_names_position() {
        let err = SimError::CommandRejected {
            frame: 3,
            position: 1,
            source: CommandError::UnknownEntity(9),
        };
        assert_eq!(
            err.to_string(),
            "Command 1 of frame 3 rejected: Unknown entity: 9"
        );
    }
}
