//! End-to-end orchestrator tests.
//!
//! These tests verify the full run from request to streamed answer:
//! planning, wave execution, synthesis, fallback to direct mode and
//! cancellation. The scripted model stands in for the real backend.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskweave::core::{Plan, TaskState};
use taskweave::orchestration::{OutputEvent, ProgressEvent, RunPhase};
use taskweave::Error;

use crate::fixtures::{
    answer_text, assert_dependency_order, default_result, fan_in_plan, progress_events, query,
    Behavior, OrchestratorHarness, ScriptedModel,
};

fn phases(events: &[OutputEvent]) -> Vec<RunPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Phase(p) => Some(*p),
            _ => None,
        })
        .collect()
}

/// Test: E2E Happy Path
/// Given a model that plans {t1, t2, t3:[t1, t2]}
/// When the orchestrator runs
/// Then the answer streams after RunComplete and all phases are visited
#[tokio::test]
async fn test_e2e_happy_path_fan_in() {
    let plan = fan_in_plan();
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan(&plan)
            .with_answer("Here is the combined answer."),
    );

    let (result, events) = harness.run("Explain the topic").await;
    let summary = result.unwrap();

    assert_eq!(summary.answer, "Here is the combined answer.");
    assert_eq!(answer_text(&events), summary.answer);
    assert!(!summary.fell_back);
    assert_eq!(summary.plan.as_ref(), Some(&plan));

    assert_eq!(
        phases(&events),
        vec![
            RunPhase::Planning,
            RunPhase::Executing,
            RunPhase::Synthesizing,
            RunPhase::Done
        ]
    );

    let progress = progress_events(&events);
    assert!(matches!(progress.first(), Some(ProgressEvent::PlanReady { .. })));
    assert_eq!(progress.last(), Some(&ProgressEvent::RunComplete));
    assert_dependency_order(&plan, &progress);

    let synthesizing = events
        .iter()
        .position(|e| e == &OutputEvent::Phase(RunPhase::Synthesizing))
        .unwrap();
    let run_complete = events
        .iter()
        .position(|e| e == &OutputEvent::Progress(ProgressEvent::RunComplete))
        .unwrap();
    let first_text = events
        .iter()
        .position(|e| matches!(e, OutputEvent::Text(_)))
        .unwrap();
    assert!(run_complete < synthesizing);
    assert!(synthesizing < first_text);
}

#[tokio::test]
async fn test_plan_ready_carries_serialized_plan() {
    let plan = fan_in_plan();
    let harness = OrchestratorHarness::new(ScriptedModel::new().with_plan(&plan));

    let (_, events) = harness.run("request").await;

    let plan_json = progress_events(&events)
        .into_iter()
        .find_map(|e| match e {
            ProgressEvent::PlanReady { plan } => Some(plan),
            _ => None,
        })
        .unwrap();
    let parsed: Plan = serde_json::from_str(&plan_json).unwrap();
    assert_eq!(parsed, plan);
}

#[tokio::test]
async fn test_synthesis_sees_results_in_plan_order() {
    let plan = fan_in_plan();
    let harness = OrchestratorHarness::new(ScriptedModel::new().with_plan(&plan));

    harness.run("the question").await.0.unwrap();

    let synthesis = harness.model.instruction_for("<synthesis>").unwrap();
    assert!(synthesis.contains("Original request:\nthe question"));
    assert!(synthesis.contains("Combine everything"));
    let p1 = synthesis.find(&default_result("t1")).unwrap();
    let p2 = synthesis.find(&default_result("t2")).unwrap();
    let p3 = synthesis.find(&default_result("t3")).unwrap();
    assert!(p1 < p2 && p2 < p3);
}

/// Test: Scenario 3, failing single task
/// Given a plan {t1} where t1 fails
/// When the orchestrator runs
/// Then RunComplete is emitted and synthesis sees the placeholder
#[tokio::test]
async fn test_failed_task_placeholder_reaches_synthesis() {
    let plan = Plan::new(vec![query("t1", &[])], "Report what happened");
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan(&plan)
            .on_task("t1", Behavior::Fail("backend down".to_string())),
    );

    let (result, events) = harness.run("request").await;
    let summary = result.unwrap();

    let progress = progress_events(&events);
    assert_eq!(progress.last(), Some(&ProgressEvent::RunComplete));

    let report = summary.report.unwrap();
    assert!(matches!(
        report.state(&"t1".into()),
        Some(TaskState::Failed { .. })
    ));

    let synthesis = harness.model.instruction_for("<synthesis>").unwrap();
    assert!(synthesis.contains("task execution failed: t1: Model error: backend down"));
}

#[tokio::test]
async fn test_fenced_plan_with_prose_is_accepted() {
    let text = "Sure! Here's the plan:\n\n```json\n{\"tasks\":[{\"id\":\"t1\",\"name\":\"One\",\"instruction\":\"[task:t1] go\",\"dependencies\":[],\"type\":\"query\"}],\"final_summary_instruction\":\"Wrap up\"}\n```\nLet me know.";
    let harness = OrchestratorHarness::new(ScriptedModel::new().with_plan_text(text));

    let (result, _) = harness.run("request").await;

    let summary = result.unwrap();
    assert_eq!(summary.plan.unwrap().len(), 1);
    assert_eq!(harness.model.call_count("t1"), 1);
}

#[tokio::test]
async fn test_empty_plan_still_synthesizes() {
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan_text(r#"{"tasks": [], "final_summary_instruction": "Answer directly"}"#)
            .with_answer("nothing to split"),
    );

    let (result, events) = harness.run("hi").await;

    assert_eq!(result.unwrap().answer, "nothing to split");
    let progress = progress_events(&events);
    assert_eq!(progress.len(), 2);
    assert_eq!(progress.last(), Some(&ProgressEvent::RunComplete));
}

#[tokio::test]
async fn test_no_plan_without_fallback_is_error() {
    let harness =
        OrchestratorHarness::new(ScriptedModel::new().with_plan_text("I'd rather just answer."));

    let (result, events) = harness.run("request").await;

    assert!(matches!(result, Err(Error::NoPlan)));
    assert_eq!(phases(&events), vec![RunPhase::Planning, RunPhase::Done]);
    assert!(answer_text(&events).is_empty());
}

/// Test: Fallback to direct mode
/// Given a model whose planning response has no plan
/// When run with fallback
/// Then the request is answered by a single direct call
#[tokio::test]
async fn test_fallback_answers_directly() {
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan_text("no json here")
            .with_answer("direct answer"),
    );

    let (result, events) = harness.run_with_fallback("What is 2 + 2?").await;
    let summary = result.unwrap();

    assert!(summary.fell_back);
    assert!(summary.report.is_none());
    assert_eq!(summary.answer, "direct answer");
    assert_eq!(answer_text(&events), "direct answer");
    assert_eq!(harness.model.call_count("<plan>"), 1);
    assert_eq!(
        harness.model.instruction_for("<synthesis>").as_deref(),
        Some("What is 2 + 2?")
    );
}

#[tokio::test]
async fn test_fallback_on_invalid_plan() {
    let plan = Plan::new(vec![query("t1", &["ghost"])], "");
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan(&plan)
            .with_answer("direct"),
    );

    let (result, events) = harness.run_with_fallback("request").await;

    assert!(result.unwrap().fell_back);
    assert_eq!(harness.model.call_count("t1"), 0);
    assert!(progress_events(&events).is_empty());
}

#[tokio::test]
async fn test_run_direct_streams_single_call() {
    let harness = OrchestratorHarness::new(ScriptedModel::new().with_answer("just this"));
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let summary = harness
        .orchestrator
        .run_direct("plain question", &[], &tx, CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        if let OutputEvent::Text(chunk) = event {
            text.push_str(&chunk);
        }
    }
    assert_eq!(summary.answer, "just this");
    assert_eq!(text, "just this");
    assert_eq!(harness.model.calls().len(), 1);
}

/// Test: Cancellation during execution
/// Given a plan whose first task never answers
/// When the run is cancelled
/// Then the run aborts without synthesis
#[tokio::test]
async fn test_cancelled_run_aborts_without_synthesis() {
    let plan = fan_in_plan();
    let harness = OrchestratorHarness::new(
        ScriptedModel::new()
            .with_plan(&plan)
            .on_task("t1", Behavior::Hang),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (result, events) = harness.run_with_cancel("request", cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(harness.model.call_count("<synthesis>"), 0);
    assert_eq!(harness.model.call_count("t3"), 0);
    assert_eq!(
        progress_events(&events).last(),
        Some(&ProgressEvent::RunAborted {
            reason: "Run cancelled".to_string()
        })
    );
    assert_eq!(phases(&events).last(), Some(&RunPhase::Done));
}

#[tokio::test]
async fn test_cancel_before_planning() {
    let harness = OrchestratorHarness::new(ScriptedModel::new().with_plan(&fan_in_plan()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (result, events) = harness.run_with_cancel("request", cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(progress_events(&events).is_empty());
}
