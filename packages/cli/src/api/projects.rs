// ABOUTME: HTTP handlers for project materialization and editor file access
// ABOUTME: Tree, file read/write/delete, batched edits and regeneration

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use botyard_lifecycle::{ContainerHandle, StatusReport};
use botyard_projects::{FileMap, NewProject, Project, TreeNode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResponse, AppState};
use crate::error::{ApiResult, AppError};

/// Project plus derived fields the editor shows
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_url: Option<String>,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        let invite_url = project.invite_url();
        Self {
            project,
            invite_url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectView,
    pub status: StatusReport,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct FilesRequest {
    pub files: FileMap,
}

#[derive(Debug, Serialize)]
pub struct EditsResponse {
    pub restarted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<ContainerHandle>,
}

/// GET /api/projects
pub async fn list_projects(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<Vec<ProjectView>>>> {
    let projects = state.controller.store().list().await?;
    Ok(Json(ApiResponse::success(
        projects.into_iter().map(ProjectView::from).collect(),
    )))
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ProjectView>>)> {
    if request.files.is_empty() {
        return Err(AppError::Validation(
            "a project needs at least one file".to_string(),
        ));
    }

    let project = state.controller.store().materialize(request).await?;
    info!(project_id = %project.id, name = %project.metadata.name, "Created project");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(project.into())),
    ))
}

/// GET /api/projects/{project_id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<ProjectDetail>>> {
    let project = state.controller.store().get(&project_id).await?;
    let status = state.controller.status(&project_id).await?;
    Ok(Json(ApiResponse::success(ProjectDetail {
        project: project.into(),
        status,
    })))
}

/// DELETE /api/projects/{project_id}
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.controller.delete_project(&project_id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// GET /api/projects/{project_id}/tree
pub async fn get_tree(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<TreeNode>>>> {
    let tree = state.controller.store().tree(&project_id).await?;
    Ok(Json(ApiResponse::success(tree)))
}

/// PUT /api/projects/{project_id}/tree
///
/// Replaces the whole tree with a regenerated one; any container is stopped first.
pub async fn regenerate_tree(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<FilesRequest>,
) -> ApiResult<Json<ApiResponse<ProjectView>>> {
    if request.files.is_empty() {
        return Err(AppError::Validation(
            "a project needs at least one file".to_string(),
        ));
    }
    let project = state
        .controller
        .regenerate(&project_id, request.files)
        .await?;
    Ok(Json(ApiResponse::success(project.into())))
}

/// GET /api/projects/{project_id}/file?path=...
pub async fn read_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<ApiResponse<FileContent>>> {
    let content = state
        .controller
        .store()
        .read_file(&project_id, &query.path)
        .await?;
    Ok(Json(ApiResponse::success(FileContent {
        path: query.path,
        content,
    })))
}

/// PUT /api/projects/{project_id}/file
pub async fn write_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state
        .controller
        .store()
        .write_file(&project_id, &request.path, &request.content)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/projects/{project_id}/file?path=...
pub async fn delete_path(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state
        .controller
        .store()
        .delete_path(&project_id, &query.path)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

/// POST /api/projects/{project_id}/edits
///
/// Writes every file, then rebuilds and restarts the bot if it was running.
pub async fn apply_edits(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<FilesRequest>,
) -> ApiResult<Json<ApiResponse<EditsResponse>>> {
    let handle = state
        .controller
        .apply_edits(&project_id, &request.files)
        .await?;
    Ok(Json(ApiResponse::success(EditsResponse {
        restarted: handle.is_some(),
        handle,
    })))
}
