// ABOUTME: HTTP handlers for log snapshots, live log streaming and editing sessions
// ABOUTME: Sessions are SSE connections whose closing triggers disconnect cleanup

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    Json,
};
use botyard_lifecycle::LogSnapshot;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;
use tracing::info;

use super::{ApiResponse, AppState};
use crate::error::{ApiResult, AppError};
use crate::sse::{create_error_event, create_sse_event, create_sse_response, GuardedSseStream};

/// How often a session stream pushes the project's status
pub const SESSION_STATUS_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Only lines with a greater sequence number
    pub since: Option<u64>,
    /// At most this many of the newest lines
    pub limit: Option<usize>,
}

/// GET /api/projects/{project_id}/logs?since=&limit=
pub async fn get_logs(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<ApiResponse<LogSnapshot>>> {
    let snapshot = state
        .controller
        .logs(&project_id, query.since, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// GET /api/projects/{project_id}/logs/stream
///
/// Live lines from the current run; ends when the run's buffer is discarded.
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let receiver = state
        .controller
        .subscribe(&project_id)?
        .ok_or_else(|| AppError::NotRunning(project_id.clone()))?;

    let stream = BroadcastStream::new(receiver).filter_map(|result| match result {
        Ok(line) => create_sse_event("log", &line).ok().map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            create_sse_event("lagged", &serde_json::json!({ "skipped": skipped }))
                .ok()
                .map(Ok)
        }
    });

    Ok(create_sse_response(stream))
}

/// GET /api/projects/{project_id}/session
///
/// Pushes status every few seconds while the editor is attached. When the
/// client disconnects the session guard drops and the bot is stopped.
pub async fn session_events(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let guard = state.controller.session(&project_id).await?;
    info!(project_id = %project_id, "Editing session opened");

    let controller = state.controller.clone();
    let ticks = IntervalStream::new(tokio::time::interval(SESSION_STATUS_INTERVAL));
    let stream = ticks.then(move |_| {
        let controller = controller.clone();
        let project_id = project_id.clone();
        async move {
            let event = match controller.status(&project_id).await {
                Ok(report) => create_sse_event("status", &report)
                    .unwrap_or_else(|e| create_error_event(&e.to_string())),
                Err(e) => create_error_event(&e.to_string()),
            };
            Ok::<_, Infallible>(event)
        }
    });

    Ok(create_sse_response(GuardedSseStream::new(stream, guard)))
}
