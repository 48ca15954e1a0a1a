//! Error types for membership sync and topology expansion.

use std::time::Duration;

use roster_core::CoreError;
use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown transport target: {0}")]
    UnknownTarget(String),

    #[error("subscribe timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("port {port} on {host} is already used by {owner}")]
    PortConflict {
        host: String,
        port: u16,
        owner: String,
    },

    #[error("duplicate server id {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
