// ABOUTME: Docker implementation of the container runtime
// ABOUTME: Uses the bollard client to build, run, stop and tail one container per project

use super::{
    container_name, image_tag, BuildSpec, ContainerPresence, ContainerRuntime, ImageRef,
    ManagedContainer, OutputChunk, OutputStream, Result, RunOutcome, RunSpec, RuntimeError,
    StreamType, LABEL_MANAGED, LABEL_PROJECT_ID,
};
use crate::context::build_context;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::BuildImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LOG_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DockerRuntimeOptions {
    /// Grace period before the engine kills a stopping container
    pub stop_timeout: Duration,
    pub build_timeout: Duration,
    pub memory_mb: u64,
}

impl Default for DockerRuntimeOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            build_timeout: Duration::from_secs(300),
            memory_mb: 512,
        }
    }
}

pub struct DockerRuntime {
    client: Docker,
    options: DockerRuntimeOptions,
}

impl DockerRuntime {
    /// Connect using the platform defaults (DOCKER_HOST or the local socket).
    ///
    /// Connecting is lazy; an unreachable daemon surfaces on the first call.
    pub fn connect(options: DockerRuntimeOptions) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::EngineDown(e.to_string()))?;
        Ok(Self::with_client(client, options))
    }

    pub fn with_client(client: Docker, options: DockerRuntimeOptions) -> Self {
        Self { client, options }
    }

    fn container_config(&self, image: &ImageRef, spec: &RunSpec) -> Config<String> {
        let labels = HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT_ID.to_string(), spec.project_id.clone()),
        ]);

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            memory: Some((self.options.memory_mb * 1024 * 1024) as i64),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(image.tag.clone()),
            env: Some(env),
            labels: Some(labels),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Map a failed call to EngineDown if the daemon stopped answering, else `otherwise`
    async fn classify<F>(&self, err: BollardError, otherwise: F) -> RuntimeError
    where
        F: FnOnce(String) -> RuntimeError,
    {
        match self.client.ping().await {
            Ok(_) => otherwise(err.to_string()),
            Err(ping_err) => {
                warn!(error = %err, ping_error = %ping_err, "Docker stopped responding");
                RuntimeError::EngineDown(ping_err.to_string())
            }
        }
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> std::result::Result<String, BollardError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self.client.create_container(Some(options), config).await?;
        Ok(created.id)
    }

    async fn force_remove(&self, runtime_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(runtime_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Gone already, or removal already in progress
            Err(BollardError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(self.classify(e, RuntimeError::Transient).await),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::EngineDown(e.to_string()))
    }

    async fn build(&self, spec: &BuildSpec) -> Result<ImageRef> {
        self.ping().await?;

        let tag = image_tag(&spec.project_id);
        info!(project_id = %spec.project_id, tag = %tag, no_cache = spec.no_cache, "Building image");

        let dir = spec.context_dir.clone();
        let exclude = spec.exclude.clone();
        let (archive, descriptor) =
            tokio::task::spawn_blocking(move || build_context(&dir, &exclude))
                .await
                .map_err(|e| RuntimeError::Build {
                    output: format!("Failed to package build context: {}", e),
                })??;
        debug!(project_id = %spec.project_id, descriptor = ?descriptor, "Resolved build descriptor");

        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            t: tag.clone(),
            rm: true,
            forcerm: true,
            nocache: spec.no_cache,
            ..Default::default()
        };

        let mut output = String::new();
        let collect = async {
            let mut stream = Box::pin(self.client.build_image(options, None, Some(archive.into())));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(info) => {
                        if let Some(line) = info.stream {
                            output.push_str(&line);
                        }
                        if let Some(err) = info.error {
                            output.push_str(&err);
                            return Err(RuntimeError::Build {
                                output: output.clone(),
                            });
                        }
                    }
                    Err(e) => {
                        let captured = output.clone();
                        return Err(self
                            .classify(e, |msg| RuntimeError::Build {
                                output: format!("{}{}", captured, msg),
                            })
                            .await);
                    }
                }
            }
            Ok(())
        };

        let outcome = tokio::time::timeout(self.options.build_timeout, collect).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(project_id = %spec.project_id, error = %e, "Image build failed");
                return Err(e);
            }
            Err(_) => {
                error!(project_id = %spec.project_id, "Image build timed out");
                return Err(RuntimeError::Build {
                    output: format!(
                        "{}\nBuild timed out after {}s",
                        output,
                        self.options.build_timeout.as_secs()
                    ),
                });
            }
        }

        info!(project_id = %spec.project_id, tag = %tag, "Image built");
        Ok(ImageRef { tag })
    }

    async fn run(&self, image: &ImageRef, spec: &RunSpec) -> Result<RunOutcome> {
        let name = container_name(&spec.project_id);
        info!(project_id = %spec.project_id, container = %name, image = %image.tag, "Creating container");

        let container_id = match self
            .create_container(&name, self.container_config(image, spec))
            .await
        {
            Ok(id) => id,
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                if self.inspect(&name).await? == ContainerPresence::Running {
                    return Err(RuntimeError::AlreadyRunning(name));
                }
                warn!(container = %name, "Removing leftover container before retry");
                self.force_remove(&name).await?;
                match self
                    .create_container(&name, self.container_config(image, spec))
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        return Err(self
                            .classify(e, |output| RuntimeError::Run { output })
                            .await)
                    }
                }
            }
            Err(e) => {
                return Err(self
                    .classify(e, |output| RuntimeError::Run { output })
                    .await)
            }
        };

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            let err = self.classify(e, |output| RuntimeError::Run { output }).await;
            if let Err(cleanup) = self.force_remove(&name).await {
                warn!(container = %name, error = %cleanup, "Failed to remove container that did not start");
            }
            return Err(err);
        }

        info!(project_id = %spec.project_id, container = %name, id = %container_id, "Container started");
        Ok(RunOutcome {
            runtime_id: name,
            container_id,
        })
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        self.ping().await?;

        let options = StopContainerOptions {
            t: self.options.stop_timeout.as_secs() as i64,
        };

        match self.client.stop_container(runtime_id, Some(options)).await {
            Ok(()) => debug!(container = %runtime_id, "Container stopped"),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => debug!(container = %runtime_id, "Container was already stopped"),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %runtime_id, "Container does not exist");
                return Ok(());
            }
            Err(e) => {
                // Fall through to forced removal, which kills the container
                warn!(container = %runtime_id, error = %e, "Graceful stop failed, forcing removal");
            }
        }

        self.force_remove(runtime_id).await?;
        info!(container = %runtime_id, "Container removed");
        Ok(())
    }

    async fn logs(&self, runtime_id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut collected = Vec::new();
        let collect = async {
            let mut stream = Box::pin(self.client.logs(runtime_id, Some(options)));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => collected.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        };

        let outcome = tokio::time::timeout(LOG_SNAPSHOT_TIMEOUT, collect).await;
        match outcome {
            Ok(Ok(())) => Ok(String::from_utf8_lossy(&collected).into_owned()),
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => Err(RuntimeError::NotRunning(runtime_id.to_string())),
            Ok(Err(e)) => Err(self.classify(e, RuntimeError::Transient).await),
            Err(_) => Err(RuntimeError::Transient(format!(
                "Timed out fetching logs for {}",
                runtime_id
            ))),
        }
    }

    async fn inspect(&self, runtime_id: &str) -> Result<ContainerPresence> {
        match self.client.inspect_container(runtime_id, None).await {
            Ok(details) => {
                let state = details.state.unwrap_or_default();
                if state.running.unwrap_or(false) {
                    Ok(ContainerPresence::Running)
                } else {
                    Ok(ContainerPresence::Exited {
                        exit_code: state.exit_code,
                    })
                }
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(ContainerPresence::Missing),
            Err(e) => Err(self.classify(e, RuntimeError::Transient).await),
        }
    }

    async fn follow_logs(&self, runtime_id: &str) -> Result<OutputStream> {
        if self.inspect(runtime_id).await? == ContainerPresence::Missing {
            return Err(RuntimeError::NotRunning(runtime_id.to_string()));
        }

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let logs = self.client.logs(runtime_id, Some(options));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let container = runtime_id.to_string();

        tokio::spawn(async move {
            let mut stream = Box::pin(logs);
            while let Some(result) = stream.next().await {
                match result {
                    Ok(log) => {
                        let (stream_type, data) = match log {
                            LogOutput::StdOut { message } => (StreamType::Stdout, message.to_vec()),
                            LogOutput::StdErr { message } => (StreamType::Stderr, message.to_vec()),
                            LogOutput::Console { message } => {
                                (StreamType::Stdout, message.to_vec())
                            }
                            _ => continue,
                        };

                        let chunk = OutputChunk {
                            timestamp: chrono::Utc::now(),
                            stream: stream_type,
                            data,
                        };

                        if tx.send(chunk).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => {
                        warn!(container = %container, error = %e, "Log follow ended with error");
                        break;
                    }
                }
            }
            debug!(container = %container, "Log follow finished");
        });

        Ok(OutputStream { receiver: rx })
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", LABEL_MANAGED)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = match self.client.list_containers(Some(options)).await {
            Ok(containers) => containers,
            Err(e) => return Err(self.classify(e, RuntimeError::Transient).await),
        };

        let managed = containers
            .into_iter()
            .filter_map(|summary| {
                let project_id = summary.labels.as_ref()?.get(LABEL_PROJECT_ID)?.clone();
                let runtime_id = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| container_name(&project_id));
                Some(ManagedContainer {
                    project_id,
                    runtime_id,
                    running: summary.state.as_deref() == Some("running"),
                })
            })
            .collect();

        Ok(managed)
    }
}
