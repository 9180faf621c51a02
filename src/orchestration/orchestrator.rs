//! Plan orchestrator: planning, wave execution, then synthesis.

use crate::core::{Plan, TaskGraph};
use crate::error::{Error, Result};
use crate::orchestration::executor::{RunOutcome, RunReport, TaskExecutor};
use crate::orchestration::model::{collect_stream, ChunkStream, Message, ModelClient, ModelRequest};
use crate::orchestration::progress::{self, ProgressEvent, DEFAULT_EVENT_BUFFER};
use crate::orchestration::{parser, prompts};
use crate::Config;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Phase of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Planning,
    Executing,
    Synthesizing,
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Planning => write!(f, "planning"),
            RunPhase::Executing => write!(f, "executing"),
            RunPhase::Synthesizing => write!(f, "synthesizing"),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

/// Everything the caller's output stream receives during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The run entered a new phase.
    Phase(RunPhase),
    /// A progress event from the executor, forwarded as it occurred.
    Progress(ProgressEvent),
    /// A chunk of the final answer.
    Text(String),
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The full final answer, as streamed.
    pub answer: String,
    /// The plan that was executed; `None` in direct mode.
    pub plan: Option<Plan>,
    /// Execution report; `None` in direct mode.
    pub report: Option<RunReport>,
    /// Whether planning failed and the run fell back to direct mode.
    pub fell_back: bool,
}

/// Tracks and announces phase transitions of one run.
///
/// Starts in `Planning`; `Done` is reachable from every phase so that
/// aborts and cancellation always end the run cleanly.
pub struct PhaseTracker {
    current: RunPhase,
    history: Vec<(RunPhase, Instant)>,
    output: mpsc::Sender<OutputEvent>,
}

impl PhaseTracker {
    /// Create a tracker and announce the `Planning` phase.
    pub async fn start(output: mpsc::Sender<OutputEvent>) -> Self {
        let _ = output.send(OutputEvent::Phase(RunPhase::Planning)).await;
        Self {
            current: RunPhase::Planning,
            history: vec![(RunPhase::Planning, Instant::now())],
            output,
        }
    }

    pub fn current(&self) -> RunPhase {
        self.current
    }

    pub fn history(&self) -> &[(RunPhase, Instant)] {
        &self.history
    }

    /// Time spent in the current phase.
    pub fn elapsed(&self) -> Duration {
        self.history
            .last()
            .map(|(_, at)| at.elapsed())
            .unwrap_or_default()
    }

    /// Move to `target`, announcing it on the output stream.
    pub async fn transition(&mut self, target: RunPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.current, to = %target, elapsed_ms = self.elapsed().as_millis() as u64, "phase transition");
        self.current = target;
        self.history.push((target, Instant::now()));
        let _ = self.output.send(OutputEvent::Phase(target)).await;
        Ok(())
    }

    /// End the run from whatever phase it is in.
    pub async fn finish(&mut self) {
        if self.current != RunPhase::Done {
            let _ = self.transition(RunPhase::Done).await;
        }
    }

    fn can_transition(&self, target: RunPhase) -> bool {
        matches!(
            (self.current, target),
            (RunPhase::Planning, RunPhase::Executing)
                | (RunPhase::Executing, RunPhase::Synthesizing)
                | (RunPhase::Planning, RunPhase::Done)
                | (RunPhase::Executing, RunPhase::Done)
                | (RunPhase::Synthesizing, RunPhase::Done)
        )
    }
}

/// Drives a request through planning, execution and synthesis.
///
/// All output goes to the `mpsc::Sender<OutputEvent>` passed to each run;
/// the caller must drain the receiver while the run is in progress.
pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    forward_task_output: bool,
    event_buffer: usize,
    hints: BTreeMap<String, String>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            forward_task_output: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
            hints: BTreeMap::new(),
        }
    }

    /// Create an orchestrator using the executor settings of `config`.
    pub fn from_config(model: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self::new(model)
            .with_forward_output(config.forward_task_output)
            .with_event_buffer(config.event_buffer)
    }

    pub fn with_forward_output(mut self, forward: bool) -> Self {
        self.forward_task_output = forward;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Context hints attached to planning, synthesis and direct calls.
    pub fn with_hints(mut self, hints: BTreeMap<String, String>) -> Self {
        self.hints = hints;
        self
    }

    /// Ask the model for a plan and validate it.
    ///
    /// Returns [`Error::NoPlan`] or [`Error::InvalidPlan`] when the response
    /// cannot be used; both are recoverable by falling back to direct mode.
    #[instrument(skip_all)]
    pub async fn plan(
        &self,
        request: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<TaskGraph> {
        let stream = self
            .generate(self.request(prompts::planning_instruction(request), history), cancel)
            .await?;
        let text = collect_stream(stream, cancel, |_| {}).await?;
        debug!(chars = text.len(), "planning response received");
        parser::parse_and_validate(&text)
    }

    /// Run `request` as a plan of parallel subtasks and stream the synthesized answer.
    ///
    /// Plan failures are returned before any task runs. A stalled scheduler
    /// returns [`Error::Structural`] and a cancelled run [`Error::Cancelled`];
    /// synthesis is skipped in both cases.
    #[instrument(name = "orchestrated_run", skip_all)]
    pub async fn run(
        &self,
        request: &str,
        history: &[Message],
        output: &mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let mut phases = PhaseTracker::start(output.clone()).await;

        let graph = match self.plan(request, history, &cancel).await {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                warn!(error = %e, "planning failed");
                phases.finish().await;
                return Err(e);
            }
        };
        info!(
            tasks = graph.task_count(),
            dependencies = graph.dependency_count(),
            "plan ready"
        );

        phases.transition(RunPhase::Executing).await?;
        let report = match self.execute(Arc::clone(&graph), request, output, cancel.clone()).await {
            Ok(report) => report,
            Err(e) => {
                phases.finish().await;
                return Err(e);
            }
        };

        match &report.outcome {
            RunOutcome::AllTerminal => {}
            RunOutcome::StructuralError(reason) => {
                phases.finish().await;
                return Err(Error::Structural(reason.clone()));
            }
            RunOutcome::Cancelled => {
                phases.finish().await;
                return Err(Error::Cancelled);
            }
        }

        phases.transition(RunPhase::Synthesizing).await?;
        let results = report.results.ordered(&graph.plan().task_ids());
        let instruction = prompts::synthesis_instruction(request, graph.plan(), &results);
        let answer = self
            .stream_answer(self.request(instruction, history), output, &cancel)
            .await;
        phases.finish().await;
        let answer = answer?;

        info!(
            run_id = %report.run_id,
            chars = answer.len(),
            failed = report.failed_count(),
            "run complete"
        );
        Ok(RunSummary {
            answer,
            plan: Some(graph.plan().clone()),
            report: Some(report),
            fell_back: false,
        })
    }

    /// Answer `request` with a single model call, streaming the output.
    #[instrument(name = "direct_run", skip_all)]
    pub async fn run_direct(
        &self,
        request: &str,
        history: &[Message],
        output: &mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let answer = self
            .stream_answer(self.request(request.to_string(), history), output, &cancel)
            .await?;
        info!(chars = answer.len(), "direct answer complete");
        Ok(RunSummary {
            answer,
            plan: None,
            report: None,
            fell_back: false,
        })
    }

    /// Orchestrated run that falls back to [`Orchestrator::run_direct`] when
    /// planning fails.
    pub async fn run_with_fallback(
        &self,
        request: &str,
        history: &[Message],
        output: &mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        match self.run(request, history, output, cancel.clone()).await {
            Err(e) if e.is_plan_failure() => {
                warn!(error = %e, "falling back to direct mode");
                let mut summary = self.run_direct(request, history, output, cancel).await?;
                summary.fell_back = true;
                Ok(summary)
            }
            other => other,
        }
    }

    /// Run the executor while forwarding its progress events to `output`.
    ///
    /// `PlanReady` is the first forwarded event, `RunComplete` or
    /// `RunAborted` the last.
    async fn execute(
        &self,
        graph: Arc<TaskGraph>,
        request: &str,
        output: &mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let plan_json = graph.plan().to_json()?;
        let (tx, mut rx) = progress::channel(self.event_buffer);
        let executor = TaskExecutor::new(Arc::clone(&self.model), tx.clone())
            .with_forward_output(self.forward_task_output);

        let run = async move {
            tx.plan_ready(plan_json).await;
            let report = executor.execute(graph, request, cancel).await;
            match &report.outcome {
                RunOutcome::AllTerminal => tx.run_complete().await,
                RunOutcome::StructuralError(reason) => tx.run_aborted(reason).await,
                RunOutcome::Cancelled => tx.run_aborted(&Error::Cancelled.to_string()).await,
            }
            report
        };

        let forward = async {
            while let Some(event) = rx.recv().await {
                let _ = output.send(OutputEvent::Progress(event)).await;
            }
        };

        let (report, ()) = tokio::join!(run, forward);
        Ok(report)
    }

    async fn stream_answer(
        &self,
        request: ModelRequest,
        output: &mpsc::Sender<OutputEvent>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut stream = self.generate(request, cancel).await?;
        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    answer.push_str(&chunk);
                    let _ = output.send(OutputEvent::Text(chunk)).await;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(answer),
            }
        }
    }

    async fn generate(&self, request: ModelRequest, cancel: &CancellationToken) -> Result<ChunkStream> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            stream = self.model.generate(request, cancel.clone()) => stream,
        }
    }

    fn request(&self, instruction: String, history: &[Message]) -> ModelRequest {
        ModelRequest::new(instruction)
            .with_history(history.to_vec())
            .with_hints(self.hints.clone())
    }
}
