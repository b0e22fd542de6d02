use std::path::PathBuf;

use mega_deploy::{ArtifactError, EngineError, JournalError, ReducerError};

/// Error types of the deployer commands.
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    /// The engine aborted the session.
    #[error("deployment aborted: {0}")]
    Engine(#[from] EngineError),

    /// The journal could not be read.
    #[error("failed to read journal: {0}")]
    Journal(#[from] JournalError),

    /// The journal does not replay.
    #[error("journal is inconsistent: {0}")]
    Reducer(#[from] ReducerError),

    /// An artifact could not be loaded.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Failed to read or create a file.
    #[error("failed to access {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A JSON input file is malformed.
    #[error("failed to parse {path}: {source}")]
    Json {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Other(#[from] std::io::Error),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The session ended with futures that did not succeed.
    #[error("deployment did not complete: {failed} failed, {timed_out} timed out, {held} held")]
    Incomplete {
        /// Failed futures.
        failed: usize,
        /// Timed out futures.
        timed_out: usize,
        /// Held futures.
        held: usize,
    },
}

/// Result type of the deployer commands.
pub type Result<T> = std::result::Result<T, DeployerError>;

/// Reads and parses a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let contents = std::fs::read(path)
        .map_err(|source| DeployerError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_slice(&contents)
        .map_err(|source| DeployerError::Json { path: path.to_path_buf(), source })
}
