// ABOUTME: HTTP error type for the Botyard API
// ABOUTME: Maps lifecycle and store failures to status codes, machine-readable codes and captured output

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use botyard_lifecycle::LifecycleError;
use botyard_projects::StoreError;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Main application error type that all handlers return
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("Not running: {0}")]
    NotRunning(String),

    #[error("Container engine down: {0}")]
    EngineDown(String),

    #[error("Image build failed")]
    BuildFailed { output: String },

    #[error("Container failed to start")]
    RuntimeFailed { output: String },

    #[error("Log fetch failed: {0}")]
    LogFetch(String),

    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Structured error response format for API consistency
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

/// Error detail structure with machine-readable codes
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, String>>,
}

impl AppError {
    /// Convert AppError to appropriate HTTP status code and error code
    pub(crate) fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::AlreadyRunning(_) => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
            AppError::NotRunning(_) => (StatusCode::CONFLICT, "NOT_RUNNING"),
            AppError::EngineDown(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_DOWN"),
            AppError::BuildFailed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "BUILD_FAILED"),
            AppError::RuntimeFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "RUNTIME_FAILED")
            }
            AppError::LogFetch(_) => (StatusCode::BAD_GATEWAY, "LOG_FETCH_FAILED"),
            AppError::RuntimeUnavailable(_) => (StatusCode::BAD_GATEWAY, "RUNTIME_UNAVAILABLE"),
            AppError::WriteFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WRITE_FAILED"),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// User-facing message; filesystem and internal details stay in the logs
    pub(crate) fn to_user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation failed: {}", msg),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::Conflict(msg) => msg.clone(),
            AppError::AlreadyRunning(project_id) => {
                format!("Project {} is already running or was not stopped", project_id)
            }
            AppError::NotRunning(project_id) => format!("Project {} is not running", project_id),
            AppError::EngineDown(_) => {
                "Container engine is not reachable. Start Docker and try again".to_string()
            }
            AppError::BuildFailed { .. } => "Image build failed, see output".to_string(),
            AppError::RuntimeFailed { .. } => "Container failed to start, see output".to_string(),
            AppError::LogFetch(_) => "Could not fetch logs, try again shortly".to_string(),
            AppError::RuntimeUnavailable(_) => {
                "Container engine returned an unexpected error, try again shortly".to_string()
            }
            AppError::WriteFailed(_) => "Failed to write project files".to_string(),
            AppError::Storage(_) => "Failed to read project files".to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }

    fn details(&self) -> Option<HashMap<String, String>> {
        match self {
            AppError::BuildFailed { output } | AppError::RuntimeFailed { output } => {
                Some(HashMap::from([("output".to_string(), output.clone())]))
            }
            _ => None,
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(what) => AppError::NotFound(what),
            LifecycleError::Validation(msg) => AppError::Validation(msg),
            LifecycleError::Conflict(msg) => AppError::Conflict(msg),
            LifecycleError::AlreadyRunning(id) => AppError::AlreadyRunning(id),
            LifecycleError::EngineDown(msg) => AppError::EngineDown(msg),
            LifecycleError::Build { output } => AppError::BuildFailed { output },
            LifecycleError::Runtime { output } => AppError::RuntimeFailed { output },
            LifecycleError::NotRunning(id) => AppError::NotRunning(id),
            LifecycleError::LogFetch(msg) => AppError::LogFetch(msg),
            LifecycleError::Transient(msg) => AppError::RuntimeUnavailable(msg),
            LifecycleError::Write(msg) => AppError::WriteFailed(msg),
            LifecycleError::Storage(msg) => AppError::Storage(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        LifecycleError::from(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();
        let user_message = self.to_user_message();

        if status_code.is_server_error() {
            error!(
                request_id = %request_id,
                error_code = %error_code,
                error = %self,
                "Server error response"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                error_code = %error_code,
                error = %self,
                "API error response"
            );
        }

        let error_response = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: error_code.to_string(),
                message: user_message,
                details: self.details(),
            },
            request_id,
        };

        let mut response = Json(error_response).into_response();
        *response.status_mut() = status_code;
        response
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
