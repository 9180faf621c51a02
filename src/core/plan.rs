//! The plan: every task of one request plus the synthesis instruction.

use crate::core::task::{TaskId, TaskNode};
use serde::{Deserialize, Serialize};

/// A complete plan as produced by the planning call.
///
/// The serialized form is the plan wire format:
///
/// ```json
/// {
///   "tasks": [{"id": "t1", "name": "...", "instruction": "...", "dependencies": [], "type": "query"}],
///   "final_summary_instruction": "..."
/// }
/// ```
///
/// A `Plan` is only a container; structural checks live in
/// [`TaskGraph`](crate::core::TaskGraph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Tasks in the order the model listed them.
    pub tasks: Vec<TaskNode>,
    /// Instruction for the synthesis step.
    #[serde(default)]
    pub final_summary_instruction: String,
}

impl Plan {
    /// Create a plan from tasks and a synthesis instruction.
    pub fn new(tasks: Vec<TaskNode>, final_summary_instruction: &str) -> Self {
        Self {
            tasks,
            final_summary_instruction: final_summary_instruction.to_string(),
        }
    }

    /// Look up a task by id.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
