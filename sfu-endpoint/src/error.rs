//! Error types for the endpoint

use crate::codec::CodecError;
use thiserror::Error;

/// Endpoint error types
#[derive(Debug, Error)]
pub enum Error {
    /// Pre-flight check of a command failed; the command never executed
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("There is no active peer connection")]
    NoConnection,

    /// Malformed or unexpected media event
    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// Failure reported by the native transport
    #[error("Transport error: {0:#}")]
    Transport(anyhow::Error),

    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Terminal reason given to commands cancelled by a disconnect
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The endpoint was dropped before the command settled
    #[error("Command dropped before completion")]
    CommandDropped,
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(err)
    }
}

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, Error>;
