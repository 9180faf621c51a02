//! Wave executor for plan tasks.
//!
//! The executor runs a validated [`TaskGraph`] in waves. Each wave is every
//! task whose dependencies have all reached a terminal state; the wave's
//! tasks run concurrently as separate tokio tasks, and the executor joins the
//! whole wave before computing the next one. By the time a task starts, every
//! dependency result is already in the [`ResultStore`].
//!
//! A failing task never takes its siblings down: its failure is recorded as a
//! placeholder result, which still unblocks its dependents.

use crate::core::{TaskGraph, TaskId, TaskNode, TaskRecord, TaskState};
use crate::error::Error;
use crate::orchestration::model::{collect_stream, ModelClient, ModelRequest};
use crate::orchestration::progress::ProgressSender;
use crate::orchestration::prompts;
use crate::orchestration::store::{failure_placeholder, ResultStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task reached a terminal state.
    AllTerminal,
    /// Pending tasks remained with nothing ready to run.
    StructuralError(String),
    /// Cancellation stopped the run before all tasks finished.
    Cancelled,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier of this run, used in logs.
    pub run_id: String,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Task ids of each wave, in execution order.
    pub waves: Vec<Vec<TaskId>>,
    /// Final per-task records, in plan order.
    pub records: Vec<TaskRecord>,
    /// The run's result store.
    pub results: ResultStore,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Final state of a task.
    pub fn state(&self, id: &TaskId) -> Option<&TaskState> {
        self.records
            .iter()
            .find(|r| &r.task_id == id)
            .map(|r| &r.state)
    }

    /// Index of the wave a task ran in.
    pub fn wave_of(&self, id: &TaskId) -> Option<usize> {
        self.waves.iter().position(|w| w.contains(id))
    }

    /// Number of tasks that ended in `Failed`.
    pub fn failed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.state, TaskState::Failed { .. }))
            .count()
    }
}

/// Outcome of a single task, as reported back to the wave loop.
#[derive(Debug)]
enum TaskOutcome {
    Completed,
    Failed(String),
}

/// State shared by every task of a run.
#[derive(Clone)]
struct RunContext {
    model: Arc<dyn ModelClient>,
    progress: ProgressSender,
    store: ResultStore,
    graph: Arc<TaskGraph>,
    request: Arc<str>,
    cancel: CancellationToken,
    forward_output: bool,
}

/// Runs a task graph against a model.
pub struct TaskExecutor {
    model: Arc<dyn ModelClient>,
    progress: ProgressSender,
    forward_output: bool,
}

impl TaskExecutor {
    /// Create an executor that reports progress on `progress`.
    pub fn new(model: Arc<dyn ModelClient>, progress: ProgressSender) -> Self {
        Self {
            model,
            progress,
            forward_output: false,
        }
    }

    /// Forward each task's output chunks as display-only progress events.
    pub fn with_forward_output(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }

    /// Run every task of `graph`.
    ///
    /// Returns once all tasks are terminal, the scheduler stalls, or
    /// `cancel` fires. The report is returned in all three cases; a fresh
    /// result store is created for every call.
    #[instrument(
        name = "plan_execute",
        skip_all,
        fields(run_id = tracing::field::Empty, tasks = graph.task_count())
    )]
    pub async fn execute(
        &self,
        graph: Arc<TaskGraph>,
        request: &str,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let ctx = RunContext {
            model: Arc::clone(&self.model),
            progress: self.progress.clone(),
            store: ResultStore::new(),
            graph: Arc::clone(&graph),
            request: Arc::from(request),
            cancel: cancel.clone(),
            forward_output: self.forward_output,
        };

        let mut records: HashMap<TaskId, TaskRecord> = graph
            .plan()
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskRecord::new(t.id.clone())))
            .collect();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut waves: Vec<Vec<TaskId>> = Vec::new();

        let outcome = loop {
            if cancel.is_cancelled() {
                warn!(
                    pending = graph.pending_count(&completed),
                    "run cancelled, no further waves"
                );
                break RunOutcome::Cancelled;
            }

            if graph.all_complete(&completed) {
                break RunOutcome::AllTerminal;
            }

            let ready: Vec<TaskNode> = graph.ready_tasks(&completed).into_iter().cloned().collect();

            if ready.is_empty() {
                let stuck: Vec<String> = graph
                    .topological_order()
                    .iter()
                    .filter(|id| !completed.contains(*id))
                    .map(|id| id.to_string())
                    .collect();
                let reason = format!(
                    "{} pending task(s) can never become ready: {}",
                    stuck.len(),
                    stuck.join(", ")
                );
                error!(reason = %reason, "scheduler stalled");
                self.progress.structural_error(&reason).await;
                break RunOutcome::StructuralError(reason);
            }

            let wave = waves.len();
            let ids: Vec<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
            info!(wave, tasks = ?ids, "starting wave");

            for id in &ids {
                if let Some(record) = records.get_mut(id) {
                    record.start(wave);
                }
            }

            let handles: Vec<_> = ready
                .into_iter()
                .map(|task| tokio::spawn(execute_task(ctx.clone(), task)))
                .collect();

            // Barrier: every task of the wave reaches a terminal state first.
            let joined = futures::future::join_all(handles).await;

            for (id, result) in ids.iter().zip(joined) {
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        // The task died before recording anything itself.
                        let reason = Error::TaskJoin(join_err.to_string()).to_string();
                        error!(task_id = %id, error = %reason, "task aborted");
                        ctx.store
                            .insert(id.clone(), failure_placeholder(id, &reason));
                        self.progress.task_failed(id, &reason).await;
                        TaskOutcome::Failed(reason)
                    }
                };

                if let Some(record) = records.get_mut(id) {
                    match &outcome {
                        TaskOutcome::Completed => record.complete(),
                        TaskOutcome::Failed(reason) => record.fail(reason),
                    }
                }
                completed.insert(id.clone());
            }

            debug!(wave, completed = completed.len(), "wave finished");
            waves.push(ids);
        };

        let records: Vec<TaskRecord> = graph
            .plan()
            .tasks
            .iter()
            .filter_map(|t| records.remove(&t.id))
            .collect();

        let report = RunReport {
            run_id,
            outcome,
            waves,
            records,
            results: ctx.store,
            elapsed: started.elapsed(),
        };

        info!(
            outcome = ?report.outcome,
            waves = report.waves.len(),
            failed = report.failed_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        report
    }
}

/// Run one task to a terminal state.
///
/// Always leaves exactly one result store entry for the task and emits
/// `InProgress` followed by `Completed` or `Failed`.
#[instrument(name = "task", skip_all, fields(task_id = %task.id))]
async fn execute_task(ctx: RunContext, task: TaskNode) -> TaskOutcome {
    let dependency_results: Vec<(TaskId, String, String)> = task
        .dependencies
        .iter()
        .map(|dep| {
            let name = ctx
                .graph
                .get_task(dep)
                .map(|t| t.name.clone())
                .unwrap_or_default();
            let result = ctx.store.get(dep).unwrap_or_default();
            (dep.clone(), name, result)
        })
        .collect();
    let instruction = prompts::task_instruction(&ctx.request, &task, &dependency_results);

    ctx.progress.task_started(&task.id).await;
    debug!("task started");

    match run_model(&ctx, &task.id, instruction).await {
        Ok(output) => {
            ctx.store.insert(task.id.clone(), output);
            ctx.progress.task_completed(&task.id).await;
            info!("task completed");
            TaskOutcome::Completed
        }
        Err(e) => {
            let reason = e.to_string();
            ctx.store
                .insert(task.id.clone(), failure_placeholder(&task.id, &reason));
            ctx.progress.task_failed(&task.id, &reason).await;
            warn!(error = %reason, "task failed");
            TaskOutcome::Failed(reason)
        }
    }
}

async fn run_model(ctx: &RunContext, task_id: &TaskId, instruction: String) -> crate::Result<String> {
    let stream = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
        stream = ctx.model.generate(ModelRequest::new(instruction), ctx.cancel.clone()) => stream?,
    };

    collect_stream(stream, &ctx.cancel, |chunk| {
        if ctx.forward_output {
            ctx.progress.task_output(task_id, chunk);
        }
    })
    .await
}
