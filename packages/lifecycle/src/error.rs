// ABOUTME: Error taxonomy for lifecycle operations
// ABOUTME: Folds store and runtime failures into the kinds clients act on

use botyard_projects::StoreError;
use botyard_sandbox::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Project {0} already has an active container")]
    AlreadyRunning(String),

    #[error("Container engine is not reachable: {0}")]
    EngineDown(String),

    #[error("Image build failed")]
    Build { output: String },

    #[error("Container failed to start")]
    Runtime { output: String },

    #[error("Project {0} is not running")]
    NotRunning(String),

    #[error("Failed to fetch logs: {0}")]
    LogFetch(String),

    #[error("Transient runtime error: {0}")]
    Transient(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LifecycleError {
    /// Captured build or run output, surfaced verbatim to clients
    pub fn output(&self) -> Option<&str> {
        match self {
            LifecycleError::Build { output } | LifecycleError::Runtime { output } => Some(output),
            _ => None,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => LifecycleError::NotFound(what),
            StoreError::InvalidProjectId { .. } | StoreError::DirectoryNotEmpty(_) => {
                LifecycleError::Validation(err.to_string())
            }
            StoreError::Conflict(msg) => LifecycleError::Conflict(msg),
            StoreError::Write { .. } => LifecycleError::Write(err.to_string()),
            StoreError::Read { .. } => LifecycleError::Storage(err.to_string()),
        }
    }
}

impl From<RuntimeError> for LifecycleError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::EngineDown(msg) => LifecycleError::EngineDown(msg),
            RuntimeError::Build { output } => LifecycleError::Build { output },
            RuntimeError::Run { output } => LifecycleError::Runtime { output },
            RuntimeError::AlreadyRunning(name) => LifecycleError::AlreadyRunning(name),
            RuntimeError::NotRunning(name) => LifecycleError::NotRunning(name),
            RuntimeError::Transient(msg) => LifecycleError::Transient(msg),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
