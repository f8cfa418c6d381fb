// ABOUTME: Liveness and container engine reachability endpoints
// ABOUTME: Lets the editor tell "server down" apart from "Docker down"

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use super::{ApiResponse, AppState};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "botyard"
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/engine
pub async fn engine_status(State(state): State<AppState>) -> Json<ApiResponse<EngineStatus>> {
    let status = match state.controller.engine_status().await {
        Ok(()) => EngineStatus {
            reachable: true,
            error: None,
        },
        Err(e) => EngineStatus {
            reachable: false,
            error: Some(e.to_string()),
        },
    };
    Json(ApiResponse::success(status))
}
