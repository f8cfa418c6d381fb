// ABOUTME: In-memory container runtime used by lifecycle integration tests
// ABOUTME: Tracks live containers per name and counts duplicate-container violations

#![allow(dead_code)]

use async_trait::async_trait;
use botyard_lifecycle::{ControllerSettings, LifecycleController, LifecycleError, LogSnapshot};
use botyard_projects::{FileMap, NewProject, ProjectStore};
use botyard_sandbox::{
    container_name, image_tag, BuildSpec, ContainerPresence, ContainerRuntime, ImageRef,
    ManagedContainer, OutputChunk, OutputStream, RunOutcome, RunSpec, RuntimeError, StreamType,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

type Result<T> = std::result::Result<T, RuntimeError>;

struct FakeContainer {
    project_id: String,
    running: bool,
    exit_code: Option<i64>,
    output: Vec<String>,
    followers: Vec<mpsc::UnboundedSender<OutputChunk>>,
}

/// Container engine double with a configurable latency per call
#[derive(Default)]
pub struct FakeRuntime {
    engine_down: AtomicBool,
    fail_build: AtomicBool,
    containers: Mutex<HashMap<String, FakeContainer>>,
    violations: AtomicUsize,
    builds: AtomicUsize,
    latency: Mutex<Duration>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let runtime = Self::default();
        *runtime.latency.lock().unwrap() = latency;
        Arc::new(runtime)
    }

    pub fn set_engine_down(&self, down: bool) {
        self.engine_down.store(down, Ordering::SeqCst);
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.fail_build.store(fail, Ordering::SeqCst);
    }

    /// Times `run` found a live container under the same name
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn live_containers(&self) -> usize {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.running)
            .count()
    }

    pub fn is_live(&self, project_id: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(&container_name(project_id))
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Write a line of output as the running bot would
    pub fn emit(&self, project_id: &str, line: &str) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(&container_name(project_id)) {
            let text = format!("{}\n", line);
            container.output.push(line.to_string());
            container.followers.retain(|tx| {
                tx.send(OutputChunk {
                    timestamp: Utc::now(),
                    stream: StreamType::Stdout,
                    data: text.as_bytes().to_vec(),
                })
                .is_ok()
            });
        }
    }

    /// The bot process exits; the container stays until removed
    pub fn exit(&self, project_id: &str, code: i64) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(&container_name(project_id)) {
            container.running = false;
            container.exit_code = Some(code);
            container.followers.clear();
        }
    }

    /// The container is removed behind the orchestrator's back
    pub fn vanish(&self, project_id: &str) {
        self.containers
            .lock()
            .unwrap()
            .remove(&container_name(project_id));
    }

    /// Seed a labelled container as if left by an earlier process
    pub fn seed(&self, project_id: &str, running: bool) {
        self.containers.lock().unwrap().insert(
            container_name(project_id),
            FakeContainer {
                project_id: project_id.to_string(),
                running,
                exit_code: if running { None } else { Some(0) },
                output: Vec::new(),
                followers: Vec::new(),
            },
        );
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_engine(&self) -> Result<()> {
        if self.engine_down.load(Ordering::SeqCst) {
            Err(RuntimeError::EngineDown("fake engine is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.check_engine()
    }

    async fn build(&self, spec: &BuildSpec) -> Result<ImageRef> {
        self.check_engine()?;
        self.pause().await;
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(RuntimeError::Build {
                output: "SyntaxError: invalid syntax (bot.py, line 3)".to_string(),
            });
        }
        Ok(ImageRef {
            tag: image_tag(&spec.project_id),
        })
    }

    async fn run(&self, _image: &ImageRef, spec: &RunSpec) -> Result<RunOutcome> {
        self.check_engine()?;
        self.pause().await;
        let name = container_name(&spec.project_id);
        let mut containers = self.containers.lock().unwrap();
        if containers.get(&name).map(|c| c.running).unwrap_or(false) {
            self.violations.fetch_add(1, Ordering::SeqCst);
            return Err(RuntimeError::AlreadyRunning(name));
        }
        containers.insert(
            name.clone(),
            FakeContainer {
                project_id: spec.project_id.clone(),
                running: true,
                exit_code: None,
                output: Vec::new(),
                followers: Vec::new(),
            },
        );
        Ok(RunOutcome {
            runtime_id: name,
            container_id: format!("fake-{}", spec.project_id),
        })
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        self.check_engine()?;
        self.pause().await;
        self.containers.lock().unwrap().remove(runtime_id);
        Ok(())
    }

    async fn logs(&self, runtime_id: &str, tail: usize) -> Result<String> {
        self.check_engine()?;
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(runtime_id)
            .ok_or_else(|| RuntimeError::NotRunning(runtime_id.to_string()))?;
        let start = container.output.len().saturating_sub(tail);
        Ok(container.output[start..]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect())
    }

    async fn inspect(&self, runtime_id: &str) -> Result<ContainerPresence> {
        self.check_engine()?;
        self.pause().await;
        let containers = self.containers.lock().unwrap();
        Ok(match containers.get(runtime_id) {
            Some(c) if c.running => ContainerPresence::Running,
            Some(c) => ContainerPresence::Exited {
                exit_code: c.exit_code,
            },
            None => ContainerPresence::Missing,
        })
    }

    async fn follow_logs(&self, runtime_id: &str) -> Result<OutputStream> {
        self.check_engine()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(runtime_id)
            .ok_or_else(|| RuntimeError::NotRunning(runtime_id.to_string()))?;
        for line in &container.output {
            let _ = tx.send(OutputChunk {
                timestamp: Utc::now(),
                stream: StreamType::Stdout,
                data: format!("{}\n", line).into_bytes(),
            });
        }
        if container.running {
            container.followers.push(tx);
        }
        Ok(OutputStream { receiver: rx })
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        self.check_engine()?;
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, c)| ManagedContainer {
                project_id: c.project_id.clone(),
                runtime_id: name.clone(),
                running: c.running,
            })
            .collect())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub runtime: Arc<FakeRuntime>,
    pub controller: Arc<LifecycleController>,
}

impl Harness {
    pub async fn new(runtime: Arc<FakeRuntime>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path().to_path_buf()).await.unwrap();
        let settings = ControllerSettings {
            log_buffer_lines: 50,
            log_tail_lines: 20,
            ready_markers: vec!["Logged in as".to_string()],
        };
        let controller = Arc::new(LifecycleController::new(
            store,
            runtime.clone() as Arc<dyn ContainerRuntime>,
            settings,
        ));
        Self {
            dir,
            runtime,
            controller,
        }
    }

    pub async fn project(&self, name: &str) -> String {
        let mut files = FileMap::new();
        files.insert(
            "bot.py".to_string(),
            "import discord\nprint('Logged in as bot')\n".to_string(),
        );
        files.insert("requirements.txt".to_string(), "discord.py\n".to_string());
        self.controller
            .store()
            .materialize(NewProject {
                name: name.to_string(),
                files,
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Poll the controller's log snapshot until `check` accepts it
pub async fn wait_for_logs<F: Fn(&LogSnapshot) -> bool>(
    controller: &LifecycleController,
    project_id: &str,
    check: F,
) -> bool {
    for _ in 0..100 {
        if let Ok(snapshot) = controller.logs(project_id, None, None).await {
            if check(&snapshot) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll the controller's logs until they fail, returning the error
pub async fn wait_for_log_error(controller: &LifecycleController, project_id: &str) -> Option<LifecycleError> {
    for _ in 0..100 {
        if let Err(e) = controller.logs(project_id, None, None).await {
            return Some(e);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
