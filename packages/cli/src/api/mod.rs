// ABOUTME: Router assembly and shared state for the Botyard HTTP API
// ABOUTME: Wires project, lifecycle and log handlers under /api

use axum::{
    routing::{get, post},
    Router,
};
use botyard_lifecycle::LifecycleController;
use serde::Serialize;
use std::sync::Arc;

pub mod health;
pub mod lifecycle;
pub mod logs;
pub mod projects;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
}

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let project_router = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/{project_id}",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route(
            "/{project_id}/tree",
            get(projects::get_tree).put(projects::regenerate_tree),
        )
        .route(
            "/{project_id}/file",
            get(projects::read_file)
                .put(projects::write_file)
                .delete(projects::delete_path),
        )
        .route("/{project_id}/edits", post(projects::apply_edits))
        .route("/{project_id}/start", post(lifecycle::start_project))
        .route("/{project_id}/stop", post(lifecycle::stop_project))
        .route("/{project_id}/restart", post(lifecycle::restart_project))
        .route("/{project_id}/disconnect", post(lifecycle::disconnect_project))
        .route("/{project_id}/status", get(lifecycle::project_status))
        .route("/{project_id}/logs", get(logs::get_logs))
        .route("/{project_id}/logs/stream", get(logs::stream_logs))
        .route("/{project_id}/session", get(logs::session_events));

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/engine", get(health::engine_status))
        .nest("/api/projects", project_router)
        .with_state(state)
}
