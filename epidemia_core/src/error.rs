//! Error types for world construction.

use crate::cluster::MAX_CLUSTER_TYPES;
use thiserror::Error;

/// Errors that can occur while building a world or starting its agents.
///
/// Once a world is running, nothing fails recoverably: broken invariants
/// are programming errors and are checked with debug assertions.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No cluster type is defined
    #[error("No cluster types defined")]
    NoClusterTypes,

    /// More cluster types than a person has membership slots
    #[error("Too many cluster types: {0} (maximum {})", MAX_CLUSTER_TYPES)]
    TooManyClusterTypes(usize),

    /// Population is zero
    #[error("Population must be positive")]
    EmptyPopulation,

    /// A parameter makes the world impossible to build
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// An agent thread could not be started
    #[error("Failed to start agent thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl BuildError {
    /// Creates an invalid-parameter error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
