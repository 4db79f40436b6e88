//! Error types
//!
//! Library operations return [`Error`]. Execution outcomes are not errors:
//! the orchestrator folds every failure into an `ExecutionResult`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the process supervisor, the permission bridge and the
/// permission cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The agent (or helper) executable could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A piped stdio handle was not available on the child
    #[error("agent process has no {0} pipe")]
    MissingPipe(&'static str),

    /// Writing a turn to the agent's stdin failed
    #[error("failed to write to agent stdin: {0}")]
    Stdin(#[source] io::Error),

    /// Waiting for the agent to exit failed
    #[error("failed to wait for agent process: {0}")]
    Wait(#[source] io::Error),

    /// Socket setup or transport failure in the permission bridge
    #[error("permission bridge error: {0}")]
    Bridge(#[source] io::Error),

    /// Reading or writing the persisted permission file failed
    #[error("permission cache I/O error at {}: {source}", path.display())]
    CacheIo {
        /// Backing file
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host capability (elicitation or progress) failed
    #[error("host error: {0}")]
    Host(String),
}

/// Result alias for library operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
