//! Error taxonomy for the orchestrator
//!
//! Every error propagates unchanged up to the CLI entry point, which is the
//! only place that prints and picks the exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Phase;
use buildyard_sdk::WorkerMessage;

/// Malformed CLI input, raised before any process is spawned
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid instances value: {0}")]
    InvalidInstances(String),

    #[error("Invalid module type '{0}'")]
    InvalidModuleKind(String),

    #[error("Invalid module name '{0}'")]
    InvalidModuleName(String),
}

/// A worker said something outside the vocabulary expected at this point
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("expected {expected} as first message from worker {pid}, got {got}")]
    UnexpectedFirstMessage {
        pid: u32,
        expected: &'static str,
        got: WorkerMessage,
    },

    #[error("Can not handle {0} at this time.")]
    UnhandledMessage(WorkerMessage),

    #[error("{0}")]
    UnexpectedRunMessage(WorkerMessage),

    #[error("worker {pid} exited before sending {expected}")]
    WorkerExited { pid: u32, expected: &'static str },

    #[error("worker {pid} sent nothing within {secs}s")]
    Timeout { pid: u32, secs: u64 },
}

impl ProtocolError {
    /// The offending message, if the error was caused by one
    pub fn cause(&self) -> Option<&WorkerMessage> {
        match self {
            ProtocolError::UnexpectedFirstMessage { got, .. } => Some(got),
            ProtocolError::UnhandledMessage(msg) | ProtocolError::UnexpectedRunMessage(msg) => {
                Some(msg)
            }
            _ => None,
        }
    }
}

/// Failures of the module registry (scan, plan resolution, preparation, loading)
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("malformed module declaration {path}: {message}")]
    Scan { path: PathBuf, message: String },

    #[error("duplicate module id '{id}' declared at {first} and {second}")]
    DuplicateModule {
        id: String,
        first: String,
        second: String,
    },

    #[error("unknown plan '{name}'{}", suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UnknownPlan {
        name: String,
        suggestion: Option<String>,
    },

    #[error("module '{module}' depends on '{dependency}', which was not found")]
    MissingDependency { module: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("{step} called before {requires}")]
    OutOfOrder {
        step: &'static str,
        requires: &'static str,
    },

    #[error("module '{module}' failed to load: {source}")]
    Load {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{path} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A sub-task failed; the rest of the phase was skipped
#[derive(Debug, Error)]
#[error("{phase} sub-task '{task}' failed: {source:#}")]
pub struct PhaseError {
    pub phase: Phase,
    pub task: String,
    #[source]
    pub source: anyhow::Error,
}

/// One or more signal handlers failed during a dispatch
#[derive(Debug, Error)]
#[error("{} handler(s) failed for signal '{signal}': {}", failures.len(), failures.iter().map(|(module, err)| format!("[{}] {}", module, err)).collect::<Vec<_>>().join("; "))]
pub struct SignalError {
    pub signal: &'static str,
    /// (subscriber, error message) pairs
    pub failures: Vec<(String, String)>,
}

/// Everything that can abort a coordinator task
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("worker {pid} exited with status {}", code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    WorkerFailed { pid: u32, code: Option<i32> },

    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to notify parent process: {0}")]
    Link(#[source] std::io::Error),
}

pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;
