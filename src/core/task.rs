//! Task data model for the execution plan.
//!
//! Tasks are the atomic units of work issued to the model. Each node carries
//! a self-contained instruction and the ids of the tasks whose results it
//! needs. Nodes are immutable once parsed; run-time status lives in
//! [`TaskState`] and [`TaskRecord`], owned by the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Identifier of a task, unique within a plan.
///
/// Ids come from the model's plan text, so they are free-form strings
/// (`"t1"`, `"research"`, ...) rather than generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a task id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Kind of work a task performs.
///
/// The kind carries no scheduling behavior. Values other than `query` are
/// accepted as [`TaskKind::Other`] so a plan is never rejected for its `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A single model query.
    #[default]
    Query,
    /// Any kind this version does not know.
    #[serde(other)]
    Other,
}

/// A single node of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique identifier for this task within its plan.
    pub id: TaskId,
    /// Short human-readable label.
    pub name: String,
    /// The complete instruction issued to the model for this task.
    pub instruction: String,
    /// Tasks that must reach a terminal state before this one starts.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Reserved task kind, serialized as `type`.
    #[serde(rename = "type", default)]
    pub kind: TaskKind,
}

impl TaskNode {
    /// Create a task with no dependencies.
    pub fn new(id: &str, name: &str, instruction: &str) -> Self {
        Self {
            id: TaskId::from(id),
            name: name.to_string(),
            instruction: instruction.to_string(),
            dependencies: Vec::new(),
            kind: TaskKind::Query,
        }
    }

    /// Builder-style helper to set dependencies.
    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| TaskId::from(*d)).collect();
        self
    }

    /// Check whether this task lists `id` as a dependency.
    pub fn depends_on(&self, id: &TaskId) -> bool {
        self.dependencies.contains(id)
    }
}

/// Execution status of a task during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    /// Not started yet.
    #[default]
    Pending,
    /// The model call for this task is in flight.
    InProgress,
    /// The model call returned its full output.
    Completed,
    /// The model call failed; a placeholder result was stored.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl TaskState {
    /// Terminal states satisfy a dependent's wait condition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed { .. })
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::InProgress => write!(f, "in_progress"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Run-time bookkeeping for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The task this record belongs to.
    pub task_id: TaskId,
    /// Current state.
    pub state: TaskState,
    /// Zero-based wave the task ran in, if it ran.
    pub wave: Option<usize>,
    /// When the model call started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a pending record.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            wave: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition to in-progress within the given wave.
    pub fn start(&mut self, wave: usize) {
        self.state = TaskState::InProgress;
        self.wave = Some(wave);
        self.started_at = Some(Utc::now());
    }

    /// Transition to completed.
    pub fn complete(&mut self) {
        self.state = TaskState::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Transition to failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.state = TaskState::Failed {
            error: error.to_string(),
        };
        self.finished_at = Some(Utc::now());
    }
}
