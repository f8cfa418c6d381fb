// ABOUTME: HTTP handlers for starting, stopping and inspecting project containers
// ABOUTME: Thin wrappers over the lifecycle controller; errors keep their kind

use axum::{
    extract::{Path, Query, State},
    Json,
};
use botyard_lifecycle::{ContainerHandle, StatusReport};
use serde::Deserialize;
use tracing::info;

use super::{ApiResponse, AppState};
use crate::error::ApiResult;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartQuery {
    /// Rebuild every image layer
    #[serde(default)]
    pub no_cache: bool,
}

/// POST /api/projects/{project_id}/start
pub async fn start_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<ContainerHandle>>> {
    info!(project_id = %project_id, "Start requested");
    let handle = state.controller.start(&project_id).await?;
    Ok(Json(ApiResponse::success(handle)))
}

/// POST /api/projects/{project_id}/stop
pub async fn stop_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<ContainerHandle>>> {
    info!(project_id = %project_id, "Stop requested");
    state.controller.stop(&project_id).await?;
    Ok(Json(ApiResponse::success(state.controller.handle(&project_id)?)))
}

/// POST /api/projects/{project_id}/restart?noCache=true
pub async fn restart_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<RestartQuery>,
) -> ApiResult<Json<ApiResponse<ContainerHandle>>> {
    info!(project_id = %project_id, no_cache = query.no_cache, "Restart requested");
    let handle = state
        .controller
        .restart(&project_id, query.no_cache)
        .await?;
    Ok(Json(ApiResponse::success(handle)))
}

/// POST /api/projects/{project_id}/disconnect
///
/// Best-effort cleanup when the editor goes away; always succeeds.
pub async fn disconnect_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<ApiResponse<()>> {
    state.controller.disconnect(&project_id).await;
    Json(ApiResponse::success(()))
}

/// GET /api/projects/{project_id}/status
pub async fn project_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<StatusReport>>> {
    let report = state.controller.status(&project_id).await?;
    Ok(Json(ApiResponse::success(report)))
}
