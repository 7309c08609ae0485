//! Data Transfer Objects for the HTTP API.

use serde::{Deserialize, Serialize};

pub use crate::services::{RunSummary, TaskKind, TaskState, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

/// Response for an accepted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskResponse {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
}

/// Registry overview returned with the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub layer_ids: usize,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub task: TaskState,
    pub registry: RegistrySummary,
}
