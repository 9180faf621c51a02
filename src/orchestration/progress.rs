//! Progress events emitted during a run.
//!
//! Events flow through a bounded channel to whatever presents them (the CLI
//! prints them, tests collect them). Senders are cheap clones shared by every
//! task of a wave; sends are awaited so a task's own events are delivered in
//! the order it produced them.

use crate::core::TaskId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default capacity of the progress channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Status carried by a per-task progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::InProgress => write!(f, "IN_PROGRESS"),
            ProgressStatus::Completed => write!(f, "COMPLETED"),
            ProgressStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Events emitted for run and task lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProgressEvent {
    /// The plan was validated; carries the serialized plan.
    PlanReady {
        plan: String,
    },
    /// A task changed status.
    Task {
        task_id: TaskId,
        status: ProgressStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A chunk of a task's in-flight output, for display only.
    TaskOutput {
        task_id: TaskId,
        chunk: String,
    },
    /// The scheduler found pending tasks with no way to become ready.
    StructuralError {
        reason: String,
    },
    /// Every task reached a terminal state.
    RunComplete,
    /// The run stopped before all tasks finished.
    RunAborted {
        reason: String,
    },
}

impl ProgressEvent {
    /// The task this event refers to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            ProgressEvent::Task { task_id, .. } | ProgressEvent::TaskOutput { task_id, .. } => {
                Some(task_id)
            }
            _ => None,
        }
    }

    /// The task status this event carries, if any.
    pub fn status(&self) -> Option<ProgressStatus> {
        match self {
            ProgressEvent::Task { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sending half of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

/// Create a progress channel with the given capacity.
pub fn channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, rx)
}

impl ProgressSender {
    /// Send an event. A closed receiver is not an error for the run.
    pub async fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Send without waiting; the event is dropped if the channel is full.
    ///
    /// Only for display-only events such as [`ProgressEvent::TaskOutput`].
    pub fn try_send(&self, event: ProgressEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    pub async fn plan_ready(&self, plan: String) {
        self.send(ProgressEvent::PlanReady { plan }).await;
    }

    pub async fn task_started(&self, task_id: &TaskId) {
        self.send(ProgressEvent::Task {
            task_id: task_id.clone(),
            status: ProgressStatus::InProgress,
            error: None,
        })
        .await;
    }

    pub async fn task_completed(&self, task_id: &TaskId) {
        self.send(ProgressEvent::Task {
            task_id: task_id.clone(),
            status: ProgressStatus::Completed,
            error: None,
        })
        .await;
    }

    pub async fn task_failed(&self, task_id: &TaskId, error: &str) {
        self.send(ProgressEvent::Task {
            task_id: task_id.clone(),
            status: ProgressStatus::Failed,
            error: Some(error.to_string()),
        })
        .await;
    }

    /// Forward a chunk of task output. Dropped if the channel is full.
    pub fn task_output(&self, task_id: &TaskId, chunk: &str) -> bool {
        self.try_send(ProgressEvent::TaskOutput {
            task_id: task_id.clone(),
            chunk: chunk.to_string(),
        })
    }

    pub async fn structural_error(&self, reason: &str) {
        self.send(ProgressEvent::StructuralError {
            reason: reason.to_string(),
        })
        .await;
    }

    pub async fn run_complete(&self) {
        self.send(ProgressEvent::RunComplete).await;
    }

    pub async fn run_aborted(&self, reason: &str) {
        self.send(ProgressEvent::RunAborted {
            reason: reason.to_string(),
        })
        .await;
    }
}
