// ABOUTME: Shared fixtures for HTTP API tests
// ABOUTME: In-memory container runtime and a router over a temporary workspace

use crate::api::{create_router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use botyard_config::Config;
use botyard_lifecycle::LifecycleController;
use botyard_sandbox::{
    container_name, image_tag, BuildSpec, ContainerPresence, ContainerRuntime, ImageRef,
    ManagedContainer, OutputStream, RunOutcome, RunSpec, RuntimeError,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

mod api_tests;

type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Default)]
pub struct StubRuntime {
    pub engine_down: AtomicBool,
    pub fail_build: AtomicBool,
    live: Mutex<HashSet<String>>,
}

impl StubRuntime {
    fn engine(&self) -> Result<()> {
        if self.engine_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::EngineDown("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn is_live(&self, project_id: &str) -> bool {
        self.live.lock().unwrap().contains(&container_name(project_id))
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn ping(&self) -> Result<()> {
        self.engine()
    }

    async fn build(&self, spec: &BuildSpec) -> Result<ImageRef> {
        self.engine()?;
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(RuntimeError::Build {
                output: "ModuleNotFoundError: No module named 'discord'".to_string(),
            });
        }
        Ok(ImageRef {
            tag: image_tag(&spec.project_id),
        })
    }

    async fn run(&self, _image: &ImageRef, spec: &RunSpec) -> Result<RunOutcome> {
        self.engine()?;
        let name = container_name(&spec.project_id);
        if !self.live.lock().unwrap().insert(name.clone()) {
            return Err(RuntimeError::AlreadyRunning(name));
        }
        Ok(RunOutcome {
            runtime_id: name,
            container_id: "abc123".to_string(),
        })
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        self.engine()?;
        self.live.lock().unwrap().remove(runtime_id);
        Ok(())
    }

    async fn logs(&self, runtime_id: &str, _tail: usize) -> Result<String> {
        self.engine()?;
        if self.live.lock().unwrap().contains(runtime_id) {
            Ok("Logged in as TestBot\n".to_string())
        } else {
            Err(RuntimeError::NotRunning(runtime_id.to_string()))
        }
    }

    async fn inspect(&self, runtime_id: &str) -> Result<ContainerPresence> {
        self.engine()?;
        Ok(if self.live.lock().unwrap().contains(runtime_id) {
            ContainerPresence::Running
        } else {
            ContainerPresence::Missing
        })
    }

    async fn follow_logs(&self, runtime_id: &str) -> Result<OutputStream> {
        Err(RuntimeError::Transient(format!(
            "streaming not supported for {}",
            runtime_id
        )))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        self.engine()?;
        Ok(Vec::new())
    }
}

pub struct TestApp {
    pub _dir: TempDir,
    pub runtime: Arc<StubRuntime>,
    pub controller: Arc<LifecycleController>,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            workspace_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let runtime = Arc::new(StubRuntime::default());
        let controller = crate::build_controller(&config, runtime.clone())
            .await
            .unwrap();
        let router = create_router(AppState {
            controller: controller.clone(),
        });
        Self {
            _dir: dir,
            runtime,
            controller,
            router,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a project through the API and return its id
    pub async fn create_project(&self) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/projects",
                Some(serde_json::json!({
                    "name": "Greeter",
                    "description": "Says hello",
                    "applicationId": "123456789",
                    "files": {
                        "bot.py": "print('Logged in as Greeter')\n",
                        "requirements.txt": "discord.py\n"
                    },
                    "secrets": { "DISCORD_TOKEN": "secret-token" }
                })),
            )
            .await;
        let body = json_body(response).await;
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
