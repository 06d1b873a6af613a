//! Cluster error types.

use thiserror::Error;

use drydock_core::{AdmissionError, ConfigError};
use drydock_runtime::RuntimeError;
use drydock_scheduler::SchedulerError;

use crate::transaction::TransactionState;

/// Errors that can occur while placing or removing containers.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("engine {engine} refused container {container}: {source}")]
    Admission {
        engine: String,
        container: String,
        #[source]
        source: AdmissionError,
    },

    #[error(transparent)]
    Scheduling(#[from] SchedulerError),

    #[error("unknown scheduler: {0}")]
    UnknownScheduler(String),

    #[error("engine {engine}: failed to create container {container}: {source}")]
    Create {
        engine: String,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to pull image {image}: {source}")]
    Pull {
        engine: String,
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to start container {container}: {source}")]
    Start {
        engine: String,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to inspect container {container}: {source}")]
    Inspect {
        engine: String,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to kill container {container}: {source}")]
    Kill {
        engine: String,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to remove container {container}: {source}")]
    Remove {
        engine: String,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("engine {engine}: failed to list containers: {source}")]
    List {
        engine: String,
        #[source]
        source: RuntimeError,
    },

    #[error("duplicate engine id: {0}")]
    DuplicateEngine(String),

    #[error("engine not found: {0}")]
    EngineNotFound(String),

    #[error("placement transaction already finished in state {0:?}")]
    TransactionFinished(TransactionState),

    #[error("cluster manager is closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification of a [`ClusterError`], for callers deciding
/// whether and where to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The chosen engine cannot take the container; another engine might.
    Admission,
    /// No engine satisfies the strategy, or the strategy is unknown.
    Scheduling,
    /// A create/pull/start call failed on the runtime.
    Runtime,
    /// Inspecting, killing, or removing a container failed.
    Removal,
    Configuration,
    Shutdown,
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::Admission { .. } => ErrorKind::Admission,
            ClusterError::Scheduling(_) | ClusterError::UnknownScheduler(_) => ErrorKind::Scheduling,
            ClusterError::Create { .. }
            | ClusterError::Pull { .. }
            | ClusterError::Start { .. }
            | ClusterError::List { .. } => ErrorKind::Runtime,
            ClusterError::Inspect { .. } | ClusterError::Kill { .. } | ClusterError::Remove { .. } => {
                ErrorKind::Removal
            }
            ClusterError::DuplicateEngine(_)
            | ClusterError::EngineNotFound(_)
            | ClusterError::TransactionFinished(_)
            | ClusterError::Config(_) => ErrorKind::Configuration,
            ClusterError::Closed => ErrorKind::Shutdown,
        }
    }

    /// The admission failure, if this error is one.
    pub fn admission(&self) -> Option<&AdmissionError> {
        match self {
            ClusterError::Admission { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
