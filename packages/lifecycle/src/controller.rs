// ABOUTME: Lifecycle controller coordinating the project store and container runtime
// ABOUTME: Serializes start/stop/restart per project and keeps one container handle per project

use crate::error::{LifecycleError, LifecycleResult};
use crate::logs::{LogLine, LogMultiplexer, LogSnapshot};
use crate::state::{ContainerHandle, LifecycleEvent, LifecycleState};
use botyard_config::{Config, DEFAULT_LOG_BUFFER_LINES, DEFAULT_LOG_TAIL_LINES, DEFAULT_READY_MARKER};
use botyard_projects::{validate_project_id, FileMap, Project, ProjectStore, METADATA_FILE};
use botyard_sandbox::{
    container_name, BuildSpec, ContainerPresence, ContainerRuntime, ImageRef, RunOutcome, RunSpec,
    RuntimeError,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, MutexGuard};
use tracing::{debug, error, info, warn};

/// Longest a status query waits behind another status query for the same project
const STATUS_LOCK_WAIT: Duration = Duration::from_secs(2);

/// Tunables for the controller and its log multiplexer
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub log_buffer_lines: usize,
    /// Lines requested from the engine when no live follower exists
    pub log_tail_lines: usize,
    pub ready_markers: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            ready_markers: vec![DEFAULT_READY_MARKER.to_string()],
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_buffer_lines: config.log_buffer_lines,
            log_tail_lines: config.log_tail_lines,
            ready_markers: config.ready_markers.clone(),
        }
    }
}

/// Status answer for one project
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub handle: ContainerHandle,
    /// A start/stop/restart is currently executing for this project
    pub in_progress: bool,
    /// Readiness marker seen during the current run
    pub ready: bool,
    /// True only on the first report after readiness was reached
    pub ready_reached: bool,
}

/// Per-project lock and recorded handle
struct ProjectSlot {
    op_lock: tokio::sync::Mutex<()>,
    /// Set while a mutating operation holds `op_lock`
    busy: AtomicBool,
    handle: RwLock<ContainerHandle>,
}

/// Held for the whole of a mutating operation
struct OpGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    busy: &'a AtomicBool,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl ProjectSlot {
    fn new(project_id: &str) -> Self {
        Self {
            op_lock: tokio::sync::Mutex::new(()),
            busy: AtomicBool::new(false),
            handle: RwLock::new(ContainerHandle::absent(project_id)),
        }
    }

    async fn begin(&self) -> OpGuard<'_> {
        let lock = self.op_lock.lock().await;
        self.busy.store(true, Ordering::Release);
        OpGuard {
            _lock: lock,
            busy: &self.busy,
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn current(&self) -> ContainerHandle {
        self.handle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut ContainerHandle) -> R) -> R {
        let mut handle = self
            .handle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut handle)
    }
}

fn transition(handle: &mut ContainerHandle, event: LifecycleEvent) -> LifecycleResult<LifecycleState> {
    handle
        .apply(event)
        .map_err(|e| LifecycleError::Conflict(e.to_string()))
}

fn runtime_id_of(handle: &ContainerHandle) -> String {
    handle
        .runtime_id
        .clone()
        .unwrap_or_else(|| container_name(&handle.project_id))
}

/// Drives each project through absent → building → running → exited/failed.
///
/// Mutating operations for one project hold that project's operation lock for
/// their whole duration; different projects never share a lock. Reads (status,
/// logs) never wait for an in-flight build to finish.
pub struct LifecycleController {
    store: ProjectStore,
    runtime: Arc<dyn ContainerRuntime>,
    logs: LogMultiplexer,
    slots: Mutex<HashMap<String, Arc<ProjectSlot>>>,
    settings: ControllerSettings,
}

impl LifecycleController {
    pub fn new(
        store: ProjectStore,
        runtime: Arc<dyn ContainerRuntime>,
        settings: ControllerSettings,
    ) -> Self {
        let logs = LogMultiplexer::new(settings.log_buffer_lines, settings.ready_markers.clone());
        Self {
            store,
            runtime,
            logs,
            slots: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    fn slot(&self, project_id: &str) -> LifecycleResult<Arc<ProjectSlot>> {
        validate_project_id(project_id)?;
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(ProjectSlot::new(project_id)));
        Ok(Arc::clone(slot))
    }

    /// Recorded handle, without consulting the engine
    pub fn handle(&self, project_id: &str) -> LifecycleResult<ContainerHandle> {
        Ok(self.slot(project_id)?.current())
    }

    pub fn state_of(&self, project_id: &str) -> LifecycleResult<LifecycleState> {
        Ok(self.handle(project_id)?.state)
    }

    /// Reachability probe, independent of any project
    pub async fn engine_status(&self) -> LifecycleResult<()> {
        self.runtime.ping().await.map_err(Into::into)
    }

    /// Build and run the project's container
    pub async fn start(&self, project_id: &str) -> LifecycleResult<ContainerHandle> {
        let slot = self.slot(project_id)?;
        let _op = slot.begin().await;
        self.start_locked(project_id, &slot, false).await
    }

    /// Stop and remove the project's container, whatever the recorded state says
    pub async fn stop(&self, project_id: &str) -> LifecycleResult<()> {
        let slot = self.slot(project_id)?;
        let _op = slot.begin().await;
        self.stop_locked(project_id, &slot).await
    }

    /// Stop then start under a single hold of the project lock
    pub async fn restart(&self, project_id: &str, no_cache: bool) -> LifecycleResult<ContainerHandle> {
        let slot = self.slot(project_id)?;
        let _op = slot.begin().await;
        self.stop_locked(project_id, &slot).await?;
        self.start_locked(project_id, &slot, no_cache).await
    }

    async fn start_locked(
        &self,
        project_id: &str,
        slot: &ProjectSlot,
        no_cache: bool,
    ) -> LifecycleResult<ContainerHandle> {
        let current = slot.current();
        if current.state.apply(LifecycleEvent::BeginStart).is_err() {
            return Err(LifecycleError::AlreadyRunning(project_id.to_string()));
        }

        // Nothing is recorded until the engine answers and the project exists
        self.runtime.ping().await?;
        let project = self.store.get(project_id).await?;

        slot.update(|h| transition(h, LifecycleEvent::BeginStart))?;
        self.logs.open(project_id);
        info!(project_id = %project_id, no_cache, "Building project");

        match self.launch(&project, no_cache).await {
            Ok((image, outcome)) => {
                let handle = slot.update(|h| {
                    transition(h, LifecycleEvent::Launched)?;
                    h.runtime_id = Some(outcome.runtime_id.clone());
                    h.container_id = Some(outcome.container_id.clone());
                    h.image = Some(image.tag.clone());
                    h.started_at = Some(Utc::now());
                    Ok::<_, LifecycleError>(h.clone())
                })?;
                self.follow(project_id, &outcome.runtime_id).await;
                info!(project_id = %project_id, runtime_id = %outcome.runtime_id, "Project running");
                Ok(handle)
            }
            Err(err) => {
                let detail = match err.output() {
                    Some(output) if !output.is_empty() => format!("{}\n{}", err, output),
                    _ => err.to_string(),
                };
                slot.update(|h| {
                    transition(h, LifecycleEvent::LaunchFailed)?;
                    h.last_error = Some(detail);
                    Ok::<_, LifecycleError>(())
                })?;
                warn!(project_id = %project_id, error = %err, "Project failed to start");
                Err(err)
            }
        }
    }

    async fn launch(&self, project: &Project, no_cache: bool) -> LifecycleResult<(ImageRef, RunOutcome)> {
        let image = self
            .runtime
            .build(&BuildSpec {
                project_id: project.id.clone(),
                context_dir: project.root_path.clone(),
                no_cache,
                exclude: vec![METADATA_FILE.to_string()],
            })
            .await?;

        let env = self.store.secrets(&project.id).await?;
        let outcome = self
            .runtime
            .run(
                &image,
                &RunSpec {
                    project_id: project.id.clone(),
                    env,
                },
            )
            .await?;
        Ok((image, outcome))
    }

    async fn follow(&self, project_id: &str, runtime_id: &str) {
        match self.runtime.follow_logs(runtime_id).await {
            Ok(stream) => self.logs.attach(project_id, stream),
            Err(e) => warn!(
                project_id = %project_id,
                error = %e,
                "Could not follow container output, logs fall back to engine snapshots"
            ),
        }
    }

    async fn stop_locked(&self, project_id: &str, slot: &ProjectSlot) -> LifecycleResult<()> {
        let current = slot.current();
        let runtime_id = runtime_id_of(&current);

        match self.runtime.stop(&runtime_id).await {
            Ok(()) => {}
            // Nothing recorded and no engine to ask: already stopped as far as we can tell
            Err(err) if err.is_engine_down() && current.state.is_absent() => {
                debug!(project_id = %project_id, error = %err, "Engine down while stopping an absent project");
            }
            Err(err) => return Err(err.into()),
        }

        slot.update(|h| transition(h, LifecycleEvent::Stopped))?;
        self.logs.discard(project_id);
        info!(project_id = %project_id, previous = %current.state, "Project stopped");
        Ok(())
    }

    /// Current state, reconciled with the engine.
    ///
    /// A recorded container that the engine no longer knows is reset to absent;
    /// one that exited on its own is moved to exited with its exit code.
    pub async fn status(&self, project_id: &str) -> LifecycleResult<StatusReport> {
        let slot = self.slot(project_id)?;
        let _op = match slot.op_lock.try_lock() {
            Ok(lock) => lock,
            Err(_) if slot.is_busy() => return Ok(self.report(project_id, slot.current(), true)),
            // Another status query is reconciling; wait for it briefly
            Err(_) => match tokio::time::timeout(STATUS_LOCK_WAIT, slot.op_lock.lock()).await {
                Ok(lock) => lock,
                Err(_) => {
                    return Ok(self.report(project_id, slot.current(), slot.is_busy()));
                }
            },
        };

        let current = slot.current();
        if current.state.has_container() {
            match self.runtime.inspect(&runtime_id_of(&current)).await? {
                ContainerPresence::Running => {}
                ContainerPresence::Exited { exit_code } => {
                    if current.state == LifecycleState::Running {
                        slot.update(|h| {
                            transition(h, LifecycleEvent::ContainerExited)?;
                            h.exit_code = exit_code;
                            Ok::<_, LifecycleError>(())
                        })?;
                        warn!(project_id = %project_id, ?exit_code, "Container exited on its own");
                    }
                }
                ContainerPresence::Missing => {
                    self.forget_vanished(project_id, &slot);
                }
            }
        }

        Ok(self.report(project_id, slot.current(), false))
    }

    fn report(&self, project_id: &str, handle: ContainerHandle, in_progress: bool) -> StatusReport {
        StatusReport {
            handle,
            in_progress,
            ready: self.logs.is_ready(project_id),
            ready_reached: self.logs.take_ready_event(project_id),
        }
    }

    // Caller holds the operation lock
    fn forget_vanished(&self, project_id: &str, slot: &ProjectSlot) {
        let healed = slot.update(|h| {
            h.state.has_container() && transition(h, LifecycleEvent::ContainerVanished).is_ok()
        });
        if healed {
            self.logs.discard(project_id);
            warn!(project_id = %project_id, "Container no longer exists, state reset to absent");
        }
    }

    /// Snapshot of the project's recent output; never consumes it.
    ///
    /// Absent projects answer `NotRunning`. While building, or after a failed
    /// start, whatever was captured so far is returned.
    pub async fn logs(
        &self,
        project_id: &str,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> LifecycleResult<LogSnapshot> {
        let slot = self.slot(project_id)?;
        let current = slot.current();

        match current.state {
            LifecycleState::Absent => Err(LifecycleError::NotRunning(project_id.to_string())),
            LifecycleState::Building | LifecycleState::Failed => Ok(self
                .logs
                .snapshot(project_id, since, limit)
                .unwrap_or_else(LogSnapshot::empty)),
            LifecycleState::Running | LifecycleState::Exited => {
                if self.logs.has_follower(project_id) {
                    if let Some(snapshot) = self.logs.snapshot(project_id, since, limit) {
                        return Ok(snapshot);
                    }
                }
                self.engine_logs(project_id, &slot, &current, since, limit)
                    .await
            }
        }
    }

    async fn engine_logs(
        &self,
        project_id: &str,
        slot: &ProjectSlot,
        current: &ContainerHandle,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> LifecycleResult<LogSnapshot> {
        let runtime_id = runtime_id_of(current);
        match self.runtime.logs(&runtime_id, self.settings.log_tail_lines).await {
            Ok(text) => {
                self.logs.observe_text(project_id, &text);
                let mut snapshot = LogSnapshot::from_text(&text, self.logs.markers(), since, limit);
                snapshot.ready |= self.logs.is_ready(project_id);
                Ok(snapshot)
            }
            Err(RuntimeError::EngineDown(msg)) => Err(LifecycleError::EngineDown(msg)),
            Err(RuntimeError::NotRunning(_)) => {
                // Heal only if no lifecycle operation is running right now
                if let Ok(_op) = slot.op_lock.try_lock() {
                    self.forget_vanished(project_id, slot);
                }
                Err(LifecycleError::NotRunning(project_id.to_string()))
            }
            Err(other) => Err(LifecycleError::LogFetch(other.to_string())),
        }
    }

    /// Live log lines for the current run, if one has a buffer
    pub fn subscribe(&self, project_id: &str) -> LifecycleResult<Option<broadcast::Receiver<LogLine>>> {
        validate_project_id(project_id)?;
        Ok(self.logs.subscribe(project_id))
    }

    /// Delete the project directory; refused while a container is recorded
    pub async fn delete_project(&self, project_id: &str) -> LifecycleResult<()> {
        let slot = self.slot(project_id)?;
        let op = slot.begin().await;

        let state = slot.current().state;
        self.store.delete(project_id, !state.is_absent()).await?;
        self.logs.discard(project_id);
        drop(op);

        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(project_id);
        Ok(())
    }

    /// Write edited files; a running project is rebuilt from scratch and restarted.
    ///
    /// Returns the new handle when a restart happened.
    pub async fn apply_edits(
        &self,
        project_id: &str,
        files: &FileMap,
    ) -> LifecycleResult<Option<ContainerHandle>> {
        let slot = self.slot(project_id)?;
        let _op = slot.begin().await;

        self.store.write_files(project_id, files).await?;
        if slot.current().state != LifecycleState::Running {
            return Ok(None);
        }

        info!(project_id = %project_id, files = files.len(), "Restarting after edit");
        self.stop_locked(project_id, &slot).await?;
        self.start_locked(project_id, &slot, true).await.map(Some)
    }

    /// Replace the whole tree with a regenerated one, stopping any container first
    pub async fn regenerate(&self, project_id: &str, files: FileMap) -> LifecycleResult<Project> {
        let slot = self.slot(project_id)?;
        let _op = slot.begin().await;

        // Fail before touching the container if the project is unknown
        self.store.get(project_id).await?;
        if !slot.current().state.is_absent() {
            self.stop_locked(project_id, &slot).await?;
        }
        Ok(self.store.replace_tree(project_id, files).await?)
    }

    /// Best-effort stop after an editing client goes away; never fails
    pub async fn disconnect(&self, project_id: &str) {
        match self.stop(project_id).await {
            Ok(()) => info!(project_id = %project_id, "Stopped project after client disconnect"),
            Err(e) => warn!(
                project_id = %project_id,
                error = %e,
                "Disconnect cleanup failed, ignoring"
            ),
        }
    }

    /// Adopt containers left behind by a previous orchestrator process.
    ///
    /// Labelled containers whose project no longer exists are stopped.
    /// Returns how many containers were adopted.
    pub async fn recover(&self) -> LifecycleResult<usize> {
        let containers = self.runtime.list_managed().await?;
        let mut adopted = 0;

        for container in containers {
            let known = validate_project_id(&container.project_id).is_ok()
                && self.store.get(&container.project_id).await.is_ok();
            if !known {
                warn!(runtime_id = %container.runtime_id, "Removing managed container without a project");
                if let Err(e) = self.runtime.stop(&container.runtime_id).await {
                    warn!(runtime_id = %container.runtime_id, error = %e, "Failed to remove stray container");
                }
                continue;
            }

            let project_id = container.project_id.as_str();
            let slot = self.slot(project_id)?;
            let _op = slot.begin().await;
            let took_over = slot.update(|h| {
                if !h.state.is_absent() {
                    return false;
                }
                let event = LifecycleEvent::Adopted {
                    running: container.running,
                };
                if transition(h, event).is_err() {
                    return false;
                }
                h.runtime_id = Some(container.runtime_id.clone());
                true
            });
            if !took_over {
                continue;
            }

            self.logs.open(project_id);
            if container.running {
                self.follow(project_id, &container.runtime_id).await;
            }
            adopted += 1;
            info!(project_id = %project_id, running = container.running, "Adopted existing container");
        }

        Ok(adopted)
    }

    /// Stop every project that has a recorded container
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<ProjectSlot>> = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for slot in slots {
            let _op = slot.begin().await;
            let current = slot.current();
            if current.state.is_absent() {
                continue;
            }
            if let Err(e) = self.stop_locked(&current.project_id, &slot).await {
                error!(project_id = %current.project_id, error = %e, "Failed to stop project during shutdown");
            }
        }
    }
}
