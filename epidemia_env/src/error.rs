//! Error types for the Epidemia environment abstraction.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A property file could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A property line could not be parsed
    #[error("Syntax error at {origin}:{line}: {text}")]
    Syntax {
        origin: String,
        line: usize,
        text: String,
    },

    /// Distribution parameters are out of range
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
}

impl EnvError {
    /// Creates an I/O error for the given file.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a syntax error.
    pub fn syntax(origin: impl Into<String>, line: usize, text: impl Into<String>) -> Self {
        Self::Syntax {
            origin: origin.into(),
            line,
            text: text.into(),
        }
    }

    /// Creates a distribution error.
    pub fn distribution(msg: impl Into<String>) -> Self {
        Self::InvalidDistribution(msg.into())
    }
}
