//! State of the maintenance task run by the pinning service.
//!
//! Only one task exists at a time: starting a run replaces the previous
//! task's state, and polls for any other id are answered from the current one.

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::reconciler::ReconcileCase;

/// Task status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Reset,
    Incremental,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => f.write_str("reset"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

/// Counters of one maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub views_seen: usize,
    pub created: usize,
    pub updated: usize,
    pub disabled: usize,
    pub unchanged: usize,
    pub ignored: usize,
    pub pin_statements: usize,
    pub view_statements: usize,
    /// Watermark stored at commit.
    pub watermark: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Counts one reconciled view.
    pub fn record(&mut self, case: ReconcileCase) {
        self.views_seen += 1;
        match case {
            ReconcileCase::Created => self.created += 1,
            ReconcileCase::Disabled => self.disabled += 1,
            ReconcileCase::Unchanged => self.unchanged += 1,
            ReconcileCase::Ignored => self.ignored += 1,
            ReconcileCase::Relayer | ReconcileCase::Extend | ReconcileCase::Redo => {
                self.updated += 1
            }
        }
    }
}

/// Task metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: Option<String>,
    pub kind: Option<TaskKind>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
    pub summary: Option<RunSummary>,
}

impl TaskState {
    fn idle() -> Self {
        Self {
            task_id: None,
            kind: None,
            status: TaskStatus::Idle,
            started_at: None,
            finished_at: None,
            failure: None,
            summary: None,
        }
    }
}

/// Shared handle on the current task state.
#[derive(Clone)]
pub struct TaskTracker {
    state: Arc<RwLock<TaskState>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TaskState::idle())),
        }
    }

    /// Starts a new task and returns its ID.
    pub fn begin(&self, kind: TaskKind) -> String {
        let task_id = Uuid::new_v4().to_string();
        *self.state.write() = TaskState {
            task_id: Some(task_id.clone()),
            kind: Some(kind),
            status: TaskStatus::Running,
            started_at: Some(Utc::now()),
            finished_at: None,
            failure: None,
            summary: None,
        };
        task_id
    }

    pub fn complete(&self, task_id: &str, summary: RunSummary) {
        self.finish(task_id, TaskStatus::Completed, None, Some(summary));
    }

    pub fn fail(&self, task_id: &str, error_message: impl Into<String>) {
        self.finish(
            task_id,
            TaskStatus::Failed,
            Some(error_message.into()),
            None,
        );
    }

    fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        failure: Option<String>,
        summary: Option<RunSummary>,
    ) {
        let mut state = self.state.write();
        if state.task_id.as_deref() != Some(task_id) {
            warn!(
                "Ignoring {} for task {}: current task is {:?}",
                status, task_id, state.task_id
            );
            return;
        }
        state.status = status;
        state.finished_at = Some(Utc::now());
        state.failure = failure;
        state.summary = summary;
    }

    /// Status of the current task. A stale or unknown `task_id` is logged and
    /// answered with the current status.
    pub fn status(&self, task_id: &str) -> TaskStatus {
        let state = self.state.read();
        if state.task_id.as_deref() != Some(task_id) {
            warn!(
                "Status requested for task {} but current task is {:?}",
                task_id, state.task_id
            );
        }
        state.status
    }

    /// Full state of `task_id` if it is the current task.
    pub fn task(&self, task_id: &str) -> Option<TaskState> {
        let state = self.state.read();
        (state.task_id.as_deref() == Some(task_id)).then(|| state.clone())
    }

    pub fn snapshot(&self) -> TaskState {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().status == TaskStatus::Running
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
