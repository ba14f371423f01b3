//! Error types for partitioned drive and initialize calls

use thiserror::Error;

use crate::api::RemoteError;
use crate::types::Point;

/// Errors raised while partitioning, dispatching or reassembling a call.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("Agent at ({}, {}) lies outside {context}", .position.x, .position.y)]
    InvalidGeometry { position: Point, context: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Remote call failed: {0}")]
    RemoteCallFailure(#[from] RemoteError),

    #[error("Region {region_index} failed to initialize after {attempts} attempts: {last_error}")]
    RegionInitializationExhausted {
        region_index: usize,
        attempts: usize,
        last_error: RemoteError,
    },

    #[error("No response entry for agent {global_index} (region {region_index}, slot {slot})")]
    UnresolvedAgentMapping {
        global_index: usize,
        region_index: usize,
        slot: usize,
    },

    #[error("Malformed response: expected at least {expected} agents, got {actual}")]
    MalformedResponse { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PartitionError {
    /// Errors caused by the caller's input rather than by the remote service.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PartitionError::InvalidGeometry { .. }
                | PartitionError::InvalidRequest(_)
                | PartitionError::Config(_)
        )
    }
}

pub type PartitionResult<T> = Result<T, PartitionError>;
