//! Plan extraction and validation.
//!
//! The planning call returns free-form text: sometimes bare JSON, often JSON
//! inside a code fence, occasionally JSON surrounded by prose. Everything that
//! deals with that looseness lives here. Malformed payloads become "no plan"
//! and never reach the executor.

use crate::core::{Plan, TaskGraph};
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Matches the body of a fenced code block, with or without a language tag.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Locate the plan payload inside `text`.
///
/// Fenced blocks are tried first, in order; the first one containing a
/// balanced JSON object wins. Otherwise the outermost object in the raw text
/// is used.
pub fn extract_payload(text: &str) -> Option<&str> {
    for caps in FENCE_RE.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            if let Some(obj) = outermost_object(body.as_str()) {
                return Some(obj);
            }
        }
    }
    outermost_object(text)
}

/// Find the first balanced `{ ... }` span, skipping braces inside strings.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a plan from model output.
///
/// Returns `None` when no payload can be found or it does not deserialize
/// into a [`Plan`]. No structural validation happens here.
pub fn parse_plan(text: &str) -> Option<Plan> {
    let Some(payload) = extract_payload(text) else {
        debug!(len = text.len(), "no JSON object found in plan response");
        return None;
    };
    match serde_json::from_str::<Plan>(payload) {
        Ok(plan) => Some(plan),
        Err(e) => {
            warn!(error = %e, "plan payload failed to deserialize");
            None
        }
    }
}

/// Parse and validate in one step.
///
/// # Errors
/// [`Error::NoPlan`] when nothing parseable was found, [`Error::InvalidPlan`]
/// when the plan is structurally broken.
pub fn parse_and_validate(text: &str) -> Result<TaskGraph> {
    let plan = parse_plan(text).ok_or(Error::NoPlan)?;
    let graph = TaskGraph::build(plan)?;
    debug!(
        tasks = graph.task_count(),
        dependencies = graph.dependency_count(),
        "plan validated"
    );
    Ok(graph)
}
