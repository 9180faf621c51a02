//! Instruction builders for the three kinds of model call.

use crate::core::{Plan, TaskId, TaskNode};

/// Guidelines prepended to every planning request.
pub const PLANNING_GUIDELINES: &str = r#"You are a planner. Break the user's request into a small set of subtasks that can be answered independently by a language model, then combined into one answer.

Rules:
- Each task must have a unique short "id" (for example "t1", "t2").
- Each "instruction" must be complete and self-contained; the model answering it sees only that instruction plus the results of the tasks it depends on.
- List in "dependencies" only the ids whose results a task actually needs. Tasks without dependencies run in parallel.
- Never make a task depend on itself or create circular dependencies.
- Prefer 2 to 6 tasks. Use one task when the request is simple.
- "final_summary_instruction" tells the model how to combine all task results into the final answer.

Respond with JSON only, in exactly this shape:
{
  "tasks": [
    {"id": "t1", "name": "short label", "instruction": "full instruction", "dependencies": [], "type": "query"}
  ],
  "final_summary_instruction": "how to combine the results"
}"#;

/// Build the planning instruction for `request`.
pub fn planning_instruction(request: &str) -> String {
    format!("{}\n\nUser request:\n{}", PLANNING_GUIDELINES, request)
}

/// Build the instruction for one task.
///
/// `dependency_results` holds `(id, name, result)` for each dependency in
/// the order the task lists them; a missing result is passed as an empty
/// string and contributes an empty section.
pub fn task_instruction(
    request: &str,
    task: &TaskNode,
    dependency_results: &[(TaskId, String, String)],
) -> String {
    let mut out = format!(
        "Original request:\n{}\n\nYour task ({}):\n{}\n",
        request, task.name, task.instruction
    );
    if !dependency_results.is_empty() {
        out.push_str("\nResults of prerequisite tasks:\n");
        for (id, name, result) in dependency_results {
            out.push_str(&format!("\n### {} ({})\n{}\n", id, name, result));
        }
    }
    out
}

/// Build the synthesis instruction from all recorded results.
///
/// `results` must already be in plan insertion order.
pub fn synthesis_instruction(request: &str, plan: &Plan, results: &[(TaskId, String)]) -> String {
    let mut out = format!(
        "Original request:\n{}\n\n{}\n\nTask results:\n",
        request, plan.final_summary_instruction
    );
    for (id, result) in results {
        let name = plan
            .get_task(id)
            .map(|t| t.name.as_str())
            .unwrap_or_default();
        out.push_str(&format!("\n### {} ({})\n{}\n", id, name, result));
    }
    out
}
