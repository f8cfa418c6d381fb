// ABOUTME: Per-project lifecycle state machine and container handle
// ABOUTME: Every state change goes through one explicit transition table

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Absent,
    Building,
    Running,
    Exited,
    Failed,
}

impl LifecycleState {
    pub fn is_absent(self) -> bool {
        self == LifecycleState::Absent
    }

    /// States whose container the engine may still know about
    pub fn has_container(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Exited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Building => "building",
            LifecycleState::Running => "running",
            LifecycleState::Exited => "exited",
            LifecycleState::Failed => "failed",
        }
    }

    /// Apply an event, returning the next state or the rejected transition
    pub fn apply(self, event: LifecycleEvent) -> Result<LifecycleState, InvalidTransition> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        let next = match (self, event) {
            (Absent, BeginStart) => Building,
            (Building, Launched) => Running,
            (Building, LaunchFailed) => Failed,
            (Running, ContainerExited) => Exited,
            (Running | Exited, ContainerVanished) => Absent,
            (Absent, Adopted { running: true }) => Running,
            (Absent, Adopted { running: false }) => Exited,
            (_, Stopped) => Absent,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BeginStart,
    Launched,
    LaunchFailed,
    ContainerExited,
    ContainerVanished,
    /// A container left by a previous orchestrator process was found at startup
    Adopted { running: bool },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub event: LifecycleEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {:?} in state {}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

/// The controller's record of a project's container
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHandle {
    pub project_id: String,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ContainerHandle {
    pub fn absent(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            state: LifecycleState::Absent,
            runtime_id: None,
            container_id: None,
            image: None,
            started_at: None,
            exit_code: None,
            last_error: None,
        }
    }

    /// Transition in place; leaves the handle untouched on an invalid event
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<LifecycleState, InvalidTransition> {
        let next = self.state.apply(event)?;
        self.state = next;
        if next.is_absent() {
            *self = Self::absent(&self.project_id);
        }
        Ok(next)
    }
}
