//! HTTP handlers for the REST API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::dto::{HealthResponse, RegistrySummary, StartTaskResponse, StatusResponse, TaskState};
use super::error::AppError;
use super::state::AppState;
use crate::services::{TaskKind, TaskStatus};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

/// GET /health
///
/// Reports whether the store is reachable.
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let repository = state.repository.clone();
    let db_status = match tokio::task::spawn_blocking(move || repository.health_check()).await? {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: "v1".to_string(),
        database: db_status,
    }))
}

/// POST /v1/pinning/reset
pub async fn start_reset(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<StartTaskResponse>), AppError> {
    let task_id = state.service.reset().await;
    accepted(TaskKind::Reset, task_id)
}

/// POST /v1/pinning/incremental
pub async fn start_incremental(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<StartTaskResponse>), AppError> {
    let task_id = state.service.incremental().await;
    accepted(TaskKind::Incremental, task_id)
}

fn accepted(
    kind: TaskKind,
    task_id: Option<String>,
) -> Result<(StatusCode, Json<StartTaskResponse>), AppError> {
    let task_id = task_id.ok_or_else(|| {
        AppError::Conflict(format!(
            "{} not started: a run is in progress or the store is unavailable",
            kind
        ))
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartTaskResponse {
            task_id,
            kind,
            status: TaskStatus::Running,
        }),
    ))
}

/// GET /v1/pinning/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> HandlerResult<TaskState> {
    state
        .service
        .task(&task_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} is not the current task", task_id)))
}

/// GET /v1/pinning/status
pub async fn get_status(State(state): State<AppState>) -> HandlerResult<StatusResponse> {
    let registry = state.service.registry();
    Ok(Json(StatusResponse {
        task: state.service.snapshot(),
        registry: RegistrySummary {
            layer_ids: registry.len(),
            tables: registry.tables().into_iter().map(|l| l.table_name).collect(),
        },
    }))
}
