// ABOUTME: Botyard HTTP server assembly
// ABOUTME: Builds the controller from config, serves the API and stops bots on shutdown

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::Router;
use botyard_config::Config;
use botyard_lifecycle::{ControllerSettings, LifecycleController};
use botyard_projects::ProjectStore;
use botyard_sandbox::{ContainerRuntime, DockerRuntime, DockerRuntimeOptions};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod api;
pub mod error;
pub mod sse;

#[cfg(test)]
mod tests;

use api::AppState;

pub fn docker_options(config: &Config) -> DockerRuntimeOptions {
    DockerRuntimeOptions {
        stop_timeout: config.stop_timeout,
        build_timeout: config.build_timeout,
        memory_mb: config.container_memory_mb,
    }
}

/// Open the project store and wire it to `runtime`
pub async fn build_controller(
    config: &Config,
    runtime: Arc<dyn ContainerRuntime>,
) -> anyhow::Result<Arc<LifecycleController>> {
    let store = ProjectStore::open(config.workspace_root.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to open workspace at {}",
                config.workspace_root.display()
            )
        })?;
    Ok(Arc::new(LifecycleController::new(
        store,
        runtime,
        ControllerSettings::from_config(config),
    )))
}

/// Router with CORS for the editor origin and request tracing
pub fn build_app(controller: Arc<LifecycleController>, cors_origin: &str) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(
            cors_origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?,
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Ok(api::create_router(AppState { controller })
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect(docker_options(&config))
        .context("Failed to create Docker client")?;
    let controller = build_controller(&config, Arc::new(runtime)).await?;

    // Engine problems are reported per request; they must not keep the API down
    match controller.recover().await {
        Ok(0) => {}
        Ok(adopted) => info!(adopted, "Adopted running bot containers"),
        Err(e) => warn!(error = %e, "Could not recover existing containers"),
    }

    let app = build_app(controller.clone(), &config.cors_origin)?;
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(address = %address, workspace = %config.workspace_root.display(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if config.stop_on_exit {
        info!("Stopping running bots before exit");
        controller.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
