// ABOUTME: Container runtime trait and shared types for running bot projects
// ABOUTME: Defines the narrow build/run/stop/logs interface the lifecycle layer drives

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub mod docker;

pub use docker::{DockerRuntime, DockerRuntimeOptions};

/// Label marking containers owned by this orchestrator
pub const LABEL_MANAGED: &str = "botyard.managed";
/// Label carrying the owning project identifier
pub const LABEL_PROJECT_ID: &str = "botyard.project_id";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Container engine is not reachable: {0}")]
    EngineDown(String),

    #[error("Image build failed")]
    Build { output: String },

    #[error("Container failed to start")]
    Run { output: String },

    #[error("Container {0} is already running")]
    AlreadyRunning(String),

    #[error("Container {0} is not running")]
    NotRunning(String),

    #[error("Transient runtime error: {0}")]
    Transient(String),
}

impl RuntimeError {
    pub fn is_engine_down(&self) -> bool {
        matches!(self, RuntimeError::EngineDown(_))
    }

    /// Captured engine output for build/run failures
    pub fn output(&self) -> Option<&str> {
        match self {
            RuntimeError::Build { output } | RuntimeError::Run { output } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Deterministic container name for a project; one container per project
pub fn container_name(project_id: &str) -> String {
    format!("bot-{}", project_id.to_lowercase())
}

/// Image tag built for a project
pub fn image_tag(project_id: &str) -> String {
    format!("botyard-bot-{}:latest", project_id.to_lowercase())
}

/// Inputs for building a project image
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub project_id: String,
    pub context_dir: PathBuf,
    /// Rebuild every layer (used after edits)
    pub no_cache: bool,
    /// Top-level entries left out of the build context
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub tag: String,
}

/// Inputs for running a project container
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub project_id: String,
    /// Opaque environment forwarded into the container
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    /// Address used for stop/logs/inspect (the container name)
    pub runtime_id: String,
    pub container_id: String,
}

/// What the engine knows about a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPresence {
    Running,
    Exited { exit_code: Option<i64> },
    Missing,
}

/// A container carrying the managed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub project_id: String,
    pub runtime_id: String,
    pub running: bool,
}

/// Stream output from container logs
pub struct OutputStream {
    pub receiver: tokio::sync::mpsc::UnboundedReceiver<OutputChunk>,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// Container engine operations, one container per project.
///
/// Every call re-probes engine reachability as needed; implementations never
/// cache an engine-down verdict.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Cheap reachability probe, independent of any project
    async fn ping(&self) -> Result<()>;

    /// Build a runnable image from the project's directory
    async fn build(&self, spec: &BuildSpec) -> Result<ImageRef>;

    /// Start the project's single container
    async fn run(&self, image: &ImageRef, spec: &RunSpec) -> Result<RunOutcome>;

    /// Stop and remove a container; unknown or stopped containers are a success
    async fn stop(&self, runtime_id: &str) -> Result<()>;

    /// Snapshot of the container's most recent output
    async fn logs(&self, runtime_id: &str, tail: usize) -> Result<String>;

    async fn inspect(&self, runtime_id: &str) -> Result<ContainerPresence>;

    /// Live output of a running container
    async fn follow_logs(&self, runtime_id: &str) -> Result<OutputStream>;

    /// All containers carrying the managed label
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;
}
