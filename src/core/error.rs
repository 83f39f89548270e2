use std::io;

use thiserror::Error;

/// Failures surfaced by the public engine operations.
///
/// All of these are synchronous caller errors; none are transient. Every
/// public operation either completes fully or fails with no partial mutation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("concept not found: {0}")]
    NotFound(String),

    #[error("duplicate concept name: {0}")]
    DuplicateName(String),

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid relation: {0}")]
    InvalidRelation(String),

    #[error("corrupt graph image: {0}")]
    CorruptState(String),
}

impl From<io::Error> for GraphError {
    fn from(e: io::Error) -> Self {
        // IO failures only occur on the persistence path; a short read or a
        // malformed chunk both mean the image cannot be trusted.
        GraphError::CorruptState(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
