//! Error types for the lockstep boundary contracts.

use thiserror::Error;

/// Why a command handler refused to apply a command.
///
/// Every variant is the "command rejected" outcome of the execution core:
/// the step continues with the next command and nothing is rolled back.
/// Handlers must reject deterministically and without side effects, so that
/// every replica rejects the same commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command referenced an entity that is not admitted
    #[error("Unknown entity: {0}")]
    UnknownEntity(u64),

    /// The command carried an argument the handler cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Handler-defined rejection
    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl CommandError {
    /// Creates a handler-defined rejection.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Creates an invalid-argument rejection.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Peer is not known to the transport
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

impl NetError {
    /// Creates an unknown-peer error.
    pub fn unknown(peer: impl std::fmt::Display) -> Self {
        Self::UnknownPeer(peer.to_string())
    }
}
