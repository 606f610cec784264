//! Errors surfaced by the simulation harness.

use epidemia_core::BuildError;
use epidemia_env::EnvError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Property file or override could not be read
    #[error(transparent)]
    Config(#[from] EnvError),

    /// World or agents could not be built
    #[error("Failed to build world: {0}")]
    Build(#[from] BuildError),

    /// Output could not be written
    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }
}
