// src/errors.rs

//! Crate-wide error types.
//!
//! Each subsystem has its own small error enum; [`MasterError`] wraps them
//! at the crate boundary and knows which of them count as infrastructure
//! faults.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Runnable(#[from] RunnableError),

    #[error("engine stopped after {0} consecutive infrastructure faults")]
    EngineHalted(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MasterError {
    /// Whether this error means the registry or metadata store could not be
    /// reached. Operators re-raise these instead of failing the workflow.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            MasterError::Registry(RegistryError::Unavailable(_)) => true,
            MasterError::Store(StoreError::Unavailable(_)) => true,
            MasterError::Dispatch(DispatchError::Registry(RegistryError::Unavailable(_))) => true,
            _ => false,
        }
    }
}

/// Structural errors raised by [`crate::dag::DependencyGraph::topological_sort`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has cycle")]
    CycleDetected,

    #[error("unknown node '{0}'")]
    UnknownNode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// The caller offered no candidates at all. This is a caller bug, not
    /// the transient "no eligible host" condition.
    #[error("host selector called with an empty candidate set")]
    EmptyCandidates,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode registry value at '{path}': {message}")]
    Codec { path: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("not found in metadata store: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("dispatch of task '{task}' failed: {message}")]
    DispatchFailed { task: String, message: String },

    #[error("pause of task '{task}' failed: {message}")]
    PauseFailed { task: String, message: String },

    #[error("kill of task '{task}' failed: {message}")]
    KillFailed { task: String, message: String },

    #[error("executor does not support {0}")]
    Unsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No live host in the requested worker group right now. Expected and
    /// transient: the task is retried later.
    #[error("no host available in worker group '{0}'")]
    NoHostAvailable(String),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnableError {
    #[error("workflow instance {instance_id} has no task '{task}'")]
    UnknownTask { instance_id: u64, task: String },

    #[error("task '{task}' cannot handle {event} while {state}")]
    InvalidTransition {
        task: String,
        state: String,
        event: String,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, MasterError>;
