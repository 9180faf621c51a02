//! Per-run store of task results.
//!
//! The store is the only state shared between tasks of a wave. Each access
//! takes the lock for the duration of one read or write, so a reader sees
//! either no value or a complete one. A store belongs to exactly one run; it
//! is created by the executor and handed back in the run report.

use crate::core::TaskId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Placeholder text stored for a task whose model call failed.
pub fn failure_placeholder(task_id: &TaskId, reason: &str) -> String {
    format!("task execution failed: {}: {}", task_id, reason)
}

/// Concurrency-safe, write-once map from task id to textual result.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<HashMap<TaskId, String>>>,
}

impl ResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, String>> {
        // A panic while holding the lock cannot leave a half-written String
        // behind, so the map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the result for `task_id`.
    ///
    /// Returns `false` and leaves the existing value untouched if a result
    /// was already recorded.
    pub fn insert(&self, task_id: TaskId, value: String) -> bool {
        let mut map = self.lock();
        if map.contains_key(&task_id) {
            warn!(task_id = %task_id, "result already recorded, ignoring second write");
            return false;
        }
        map.insert(task_id, value);
        true
    }

    /// Get a copy of the result for `task_id`.
    pub fn get(&self, task_id: &TaskId) -> Option<String> {
        self.lock().get(task_id).cloned()
    }

    /// Whether a result exists for `task_id`.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no results are recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Results for the given ids, in the given order, skipping missing ones.
    pub fn ordered(&self, order: &[TaskId]) -> Vec<(TaskId, String)> {
        let map = self.lock();
        order
            .iter()
            .filter_map(|id| map.get(id).map(|v| (id.clone(), v.clone())))
            .collect()
    }

    /// Copy of the whole map.
    pub fn snapshot(&self) -> HashMap<TaskId, String> {
        self.lock().clone()
    }
}
