//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted mock model keyed by task id
//! - Predefined plans
//! - Harnesses that run the executor or orchestrator and collect events

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use taskweave::core::{Plan, TaskGraph, TaskId, TaskNode};
use taskweave::orchestration::{
    progress, ChunkStream, ModelClient, ModelRequest, Orchestrator, OutputEvent, ProgressEvent,
    ProgressStatus, RunReport, RunSummary, TaskExecutor,
};
use taskweave::{Error, Result};

/// Marker embedded in every fixture task instruction.
pub fn task_tag(id: &str) -> String {
    format!("[task:{}]", id)
}

/// Default reply the scripted model gives for a task.
pub fn default_result(id: &str) -> String {
    format!("result-{}", id)
}

/// A query task whose instruction carries its tag.
pub fn query(id: &str, deps: &[&str]) -> TaskNode {
    TaskNode::new(id, &format!("Task {}", id), &format!("{} do the work", task_tag(id)))
        .with_dependencies(deps)
}

/// `{t1, t2, t3: [t1, t2]}`
pub fn fan_in_plan() -> Plan {
    Plan::new(
        vec![query("t1", &[]), query("t2", &[]), query("t3", &["t1", "t2"])],
        "Combine everything",
    )
}

/// `a -> b -> c`
pub fn chain_plan() -> Plan {
    Plan::new(
        vec![query("a", &[]), query("b", &["a"]), query("c", &["b"])],
        "Summarize the chain",
    )
}

/// `a -> {b, c} -> d`
pub fn diamond_plan() -> Plan {
    Plan::new(
        vec![
            query("a", &[]),
            query("b", &["a"]),
            query("c", &["a"]),
            query("d", &["b", "c"]),
        ],
        "Summarize the diamond",
    )
}

/// `count` tasks with no dependencies.
pub fn independent_plan(count: usize) -> Plan {
    let tasks = (0..count).map(|i| query(&format!("p{}", i), &[])).collect();
    Plan::new(tasks, "Summarize")
}

pub fn graph(plan: Plan) -> Arc<TaskGraph> {
    Arc::new(TaskGraph::build(plan).expect("fixture plan should be valid"))
}

/// What the scripted model does for one task.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Stream this text, split into two chunks.
    Reply(String),
    /// Fail before streaming anything.
    Fail(String),
    /// Stream one chunk, then fail.
    FailMidStream(String),
    /// Panic inside the model call.
    Panic,
    /// Never answer; end only when cancelled.
    Hang,
}

/// One model call as observed by the scripted model.
#[derive(Debug, Clone)]
pub struct Call {
    /// Task id for task calls, `"<plan>"` or `"<synthesis>"` otherwise.
    pub key: String,
    pub instruction: String,
}

/// Mock model that answers from a script instead of a real backend.
///
/// Planning calls return the configured plan text, synthesis calls return
/// the configured answer, and task calls are matched by the `[task:<id>]`
/// tag in their instruction.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    plan_text: Option<String>,
    synthesis: Option<String>,
    behaviors: HashMap<String, Behavior>,
    delays: HashMap<String, Duration>,
    calls: Arc<Mutex<Vec<Call>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to the planning call with `text`.
    pub fn with_plan_text(mut self, text: &str) -> Self {
        self.plan_text = Some(text.to_string());
        self
    }

    /// Reply to the planning call with `plan` serialized as JSON.
    pub fn with_plan(self, plan: &Plan) -> Self {
        let json = plan.to_json().expect("plan should serialize");
        self.with_plan_text(&json)
    }

    /// Reply to the synthesis (and direct) call with `answer`.
    pub fn with_answer(mut self, answer: &str) -> Self {
        self.synthesis = Some(answer.to_string());
        self
    }

    pub fn on_task(mut self, id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    pub fn delay_task(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Instruction the model received for a task.
    pub fn instruction_for(&self, key: &str) -> Option<String> {
        self.calls()
            .into_iter()
            .find(|c| c.key == key)
            .map(|c| c.instruction)
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.calls().iter().filter(|c| c.key == key).count()
    }

    /// Highest number of concurrent model calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn classify(instruction: &str) -> String {
        if instruction.contains("You are a planner") {
            return "<plan>".to_string();
        }
        if let Some(start) = instruction.find("[task:") {
            let rest = &instruction[start + "[task:".len()..];
            if let Some(end) = rest.find(']') {
                return rest[..end].to_string();
            }
        }
        "<synthesis>".to_string()
    }
}

/// Decrements the in-flight counter when a call ends, however it ends.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn two_chunks(text: &str) -> Vec<Result<String>> {
    let mid = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map(|(i, _)| i)
        .unwrap_or(0);
    vec![Ok(text[..mid].to_string()), Ok(text[mid..].to_string())]
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ChunkStream> {
        let key = Self::classify(&request.instruction);
        self.calls.lock().unwrap().push(Call {
            key: key.clone(),
            instruction: request.instruction.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        if let Some(delay) = self.delays.get(&key) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(*delay) => {}
            }
        }

        let behavior = match key.as_str() {
            "<plan>" => Behavior::Reply(self.plan_text.clone().unwrap_or_default()),
            "<synthesis>" => {
                Behavior::Reply(self.synthesis.clone().unwrap_or_else(|| "final answer".to_string()))
            }
            id => self
                .behaviors
                .get(id)
                .cloned()
                .unwrap_or_else(|| Behavior::Reply(default_result(id))),
        };

        match behavior {
            Behavior::Reply(text) => Ok(Box::pin(futures::stream::iter(two_chunks(&text)))),
            Behavior::Fail(msg) => Err(Error::Model(msg)),
            Behavior::FailMidStream(msg) => Ok(Box::pin(futures::stream::iter(vec![
                Ok("partial".to_string()),
                Err(Error::Model(msg)),
            ]))),
            Behavior::Panic => panic!("scripted model panic for {}", key),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }
}

/// Runs a [`TaskExecutor`] and records every progress event.
pub struct ExecutorHarness {
    pub model: ScriptedModel,
}

impl ExecutorHarness {
    pub fn new(model: ScriptedModel) -> Self {
        Self { model }
    }

    pub async fn run(&self, graph: Arc<TaskGraph>) -> (RunReport, Vec<ProgressEvent>) {
        self.run_with_cancel(graph, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        graph: Arc<TaskGraph>,
        cancel: CancellationToken,
    ) -> (RunReport, Vec<ProgressEvent>) {
        let (tx, mut rx) = progress::channel(1024);
        let executor = TaskExecutor::new(Arc::new(self.model.clone()), tx);
        let report = executor.execute(graph, "the request", cancel).await;
        drop(executor);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (report, events)
    }
}

/// Runs an [`Orchestrator`] and records every output event.
pub struct OrchestratorHarness {
    pub model: ScriptedModel,
    pub orchestrator: Orchestrator,
}

impl OrchestratorHarness {
    pub fn new(model: ScriptedModel) -> Self {
        let orchestrator = Orchestrator::new(Arc::new(model.clone()));
        Self { model, orchestrator }
    }

    pub async fn run(&self, request: &str) -> (Result<RunSummary>, Vec<OutputEvent>) {
        self.collect(|tx| async move {
            self.orchestrator
                .run(request, &[], &tx, CancellationToken::new())
                .await
        })
        .await
    }

    pub async fn run_with_fallback(&self, request: &str) -> (Result<RunSummary>, Vec<OutputEvent>) {
        self.collect(|tx| async move {
            self.orchestrator
                .run_with_fallback(request, &[], &tx, CancellationToken::new())
                .await
        })
        .await
    }

    pub async fn run_with_cancel(
        &self,
        request: &str,
        cancel: CancellationToken,
    ) -> (Result<RunSummary>, Vec<OutputEvent>) {
        self.collect(|tx| async move { self.orchestrator.run(request, &[], &tx, cancel).await })
            .await
    }

    async fn collect<F, Fut>(&self, f: F) -> (Result<RunSummary>, Vec<OutputEvent>)
    where
        F: FnOnce(mpsc::Sender<OutputEvent>) -> Fut,
        Fut: std::future::Future<Output = Result<RunSummary>>,
    {
        let (tx, mut rx) = mpsc::channel(1024);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });
        let result = f(tx).await;
        let events = collector.await.expect("collector task panicked");
        (result, events)
    }
}

/// Progress events carried by an output stream.
pub fn progress_events(events: &[OutputEvent]) -> Vec<ProgressEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Progress(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

/// Concatenated answer text of an output stream.
pub fn answer_text(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

/// Status events of one task, in order.
pub fn statuses_of(events: &[ProgressEvent], id: &str) -> Vec<ProgressStatus> {
    events
        .iter()
        .filter(|e| e.task_id().map(|t| t.as_str()) == Some(id))
        .filter_map(|e| e.status())
        .collect()
}

/// Assert no task's `InProgress` event precedes a terminal event of one of
/// its dependencies.
pub fn assert_dependency_order(plan: &Plan, events: &[ProgressEvent]) {
    let mut terminal: HashSet<TaskId> = HashSet::new();
    for event in events {
        if let ProgressEvent::Task { task_id, status, .. } = event {
            match status {
                ProgressStatus::InProgress => {
                    let task = plan.get_task(task_id).expect("event for unknown task");
                    for dep in &task.dependencies {
                        assert!(
                            terminal.contains(dep),
                            "{} started before dependency {} finished",
                            task_id,
                            dep
                        );
                    }
                }
                ProgressStatus::Completed | ProgressStatus::Failed => {
                    terminal.insert(task_id.clone());
                }
            }
        }
    }
}
