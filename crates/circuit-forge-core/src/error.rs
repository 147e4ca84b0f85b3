//! Unified error types for circuit-forge.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessOutcome;
use crate::stage::Stage;

/// All errors that can occur while building or publishing circuit artifacts.
#[derive(Error, Debug)]
pub enum ForgeError {
    // --- Configuration ---

    /// The configuration file (`circuit-forge.config.json`) was not found.
    #[error("config file not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration or store file exists but contains invalid JSON.
    #[error("failed to parse {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // --- Identity ---

    /// A slug or circuit name is not safe to use as a path component.
    #[error("invalid circuit identity: {0}")]
    InvalidIdentity(String),

    /// The external identifier does not resolve to a known circuit.
    #[error("circuit not found: {0}")]
    CircuitNotFound(String),

    // --- Build ---

    /// Another build for the same slug is still running.
    #[error("a build for '{slug}' is already in progress")]
    BuildInProgress { slug: String },

    /// A pipeline stage failed; later stages were not run.
    #[error("stage '{stage}' failed")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    // --- General ---

    /// A filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// The failing stage, if this is a stage failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Why a single stage did not produce its artifact.
#[derive(Error, Debug)]
pub enum StageError {
    /// The tool ran to completion but reported failure.
    #[error("{program} {outcome}")]
    ProcessFailed {
        program: String,
        outcome: ProcessOutcome,
    },

    /// The tool is not installed or not on `PATH`.
    #[error("required tool '{name}' not found")]
    MissingTool { name: String },

    /// The tool could not be started.
    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    /// An input produced by an earlier stage (or supplied externally) is absent.
    #[error("required input missing: {path}")]
    DependencyMissing { path: PathBuf },

    /// The tool exited successfully but its artifact is not where it should be.
    #[error("expected output missing after successful run: {path}")]
    MissingOutput { path: PathBuf },

    #[error("failed to {op} {path}")]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub(crate) fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Alias for `Result<T, ForgeError>`.
pub type Result<T> = std::result::Result<T, ForgeError>;
