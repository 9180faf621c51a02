//! Task graph (Directed Acyclic Graph) built from a validated plan.
//!
//! [`TaskGraph`] is the only way a [`Plan`] reaches the executor. Building one
//! runs the structural checks (duplicate ids, unknown dependencies, self
//! dependencies, cycles) and records a topological order that the executor
//! uses as its iteration order when it computes ready sets.

use crate::core::plan::Plan;
use crate::core::task::{TaskId, TaskNode};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Structural problems that make a plan unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate task id: {task}")]
    DuplicateTask { task: TaskId },

    #[error("unknown dependency: task {task} depends on undefined task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("self dependency: task {task} depends on itself")]
    SelfDependency { task: TaskId },

    #[error("cyclic dependency detected at task {task}")]
    CyclicDependency { task: TaskId },
}

/// Outcome of validating a plan, in a form suitable for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl ValidationReport {
    /// Validate `plan` and summarize the result.
    pub fn of(plan: &Plan) -> Self {
        match validate(plan) {
            Ok(_) => Self {
                is_valid: true,
                error_message: None,
            },
            Err(e) => Self {
                is_valid: false,
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// Run every structural check on `plan`, in order, stopping at the first
/// failure. On success returns a topological order of the task ids.
pub fn validate(plan: &Plan) -> Result<Vec<TaskId>, PlanError> {
    let (graph, _) = build_graph(plan)?;
    topological_ids(&graph)
}

fn build_graph(
    plan: &Plan,
) -> Result<(DiGraph<TaskId, ()>, HashMap<TaskId, NodeIndex>), PlanError> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::with_capacity(plan.tasks.len());

    for task in &plan.tasks {
        if index.contains_key(&task.id) {
            return Err(PlanError::DuplicateTask {
                task: task.id.clone(),
            });
        }
        let node = graph.add_node(task.id.clone());
        index.insert(task.id.clone(), node);
    }

    for task in &plan.tasks {
        if let Some(dependency) = task.dependencies.iter().find(|d| !index.contains_key(*d)) {
            return Err(PlanError::UnknownDependency {
                task: task.id.clone(),
                dependency: dependency.clone(),
            });
        }
    }

    if let Some(task) = plan.tasks.iter().find(|t| t.depends_on(&t.id)) {
        return Err(PlanError::SelfDependency {
            task: task.id.clone(),
        });
    }

    for task in &plan.tasks {
        let to = index[&task.id];
        for dep in &task.dependencies {
            let from = index[dep];
            // Listing the same dependency twice adds nothing.
            if graph.find_edge(from, to).is_none() {
                graph.add_edge(from, to, ());
            }
        }
    }

    Ok((graph, index))
}

fn topological_ids(graph: &DiGraph<TaskId, ()>) -> Result<Vec<TaskId>, PlanError> {
    let sorted = toposort(graph, None).map_err(|cycle| PlanError::CyclicDependency {
        task: graph
            .node_weight(cycle.node_id())
            .cloned()
            .unwrap_or_else(|| TaskId::from("unknown")),
    })?;

    Ok(sorted
        .into_iter()
        .filter_map(|index| graph.node_weight(index).cloned())
        .collect())
}

/// A validated plan together with its dependency graph.
///
/// Edges point from a dependency to its dependent, so a task's incoming
/// neighbors are the tasks it waits on.
pub struct TaskGraph {
    plan: Plan,
    graph: DiGraph<TaskId, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Validate `plan` and build its graph.
    ///
    /// # Errors
    /// Returns the first [`PlanError`] found; see [`validate`] for the order.
    pub fn build(plan: Plan) -> Result<Self, PlanError> {
        let (graph, task_index) = build_graph(&plan)?;
        let order = topological_ids(&graph)?;
        Ok(Self {
            plan,
            graph,
            task_index,
            order,
        })
    }

    /// Build a graph without any structural checks.
    ///
    /// Only used to exercise the executor's run-time stall detection, which
    /// must hold even if a malformed plan slips past validation.
    #[cfg(test)]
    pub(crate) fn unchecked(plan: Plan) -> Self {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();
        for task in &plan.tasks {
            let node = graph.add_node(task.id.clone());
            task_index.insert(task.id.clone(), node);
        }
        let order = plan.task_ids();
        Self {
            plan,
            graph,
            task_index,
            order,
        }
    }

    /// The underlying plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Get a task by id.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.plan.get_task(id)
    }

    /// Number of tasks.
    pub fn task_count(&self) -> usize {
        self.plan.tasks.len()
    }

    /// Number of distinct dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.plan.tasks.is_empty()
    }

    /// Task ids in a valid topological order.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Tasks that depend directly on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<&TaskNode> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n))
            .filter_map(|tid| self.plan.get_task(tid))
            .collect()
    }

    // ========== Scheduling Operations ==========

    /// Get every task not yet in `completed` whose dependencies all are.
    ///
    /// Readiness is judged from each node's declared dependency list rather
    /// than from graph edges, so a dependency that never completes keeps its
    /// dependent blocked. Results follow the topological order.
    pub fn ready_tasks<'a>(&'a self, completed: &HashSet<TaskId>) -> Vec<&'a TaskNode> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter_map(|id| self.plan.get_task(id))
            .filter(|task| task.dependencies.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Check if every task is in `completed`.
    pub fn all_complete(&self, completed: &HashSet<TaskId>) -> bool {
        self.task_index.keys().all(|id| completed.contains(id))
    }

    /// Number of tasks not in `completed`.
    pub fn pending_count(&self, completed: &HashSet<TaskId>) -> usize {
        self.task_index
            .keys()
            .filter(|id| !completed.contains(*id))
            .count()
    }

    /// Partition the tasks into the waves a full run would execute.
    ///
    /// Every task finishes in exactly the wave computed here regardless of
    /// success or failure, so this is also a preview of the run.
    pub fn waves(&self) -> Vec<Vec<TaskId>> {
        let mut completed = HashSet::new();
        let mut waves = Vec::new();
        loop {
            let ready: Vec<TaskId> = self
                .ready_tasks(&completed)
                .into_iter()
                .map(|t| t.id.clone())
                .collect();
            if ready.is_empty() {
                break;
            }
            completed.extend(ready.iter().cloned());
            waves.push(ready);
        }
        waves
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
