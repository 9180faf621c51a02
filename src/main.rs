use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskweave::config::Config;
use taskweave::orchestration::{
    parse_and_validate, CliModel, Orchestrator, OutputEvent, ProgressEvent, RunPhase, RunSummary,
};
use taskweave::{Error, Result};

/// Taskweave - answer a request by planning it into parallel model subtasks
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKWEAVE_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskweave/taskweave.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Plan the request into subtasks, run them, and synthesize an answer
    Run {
        /// The request in natural language
        request: String,

        /// Print progress and the final summary as JSON
        #[arg(long)]
        json: bool,

        /// Fail instead of answering directly when planning fails
        #[arg(long)]
        no_fallback: bool,
    },

    /// Validate a plan file and show its execution waves
    Validate {
        /// Path to a plan JSON file (a fenced model response also works)
        file: PathBuf,
    },

    /// Answer the request with a single model call
    Direct {
        /// The request in natural language
        request: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskweave::log::init_with_debug(cli.debug);
    info!(debug = cli.debug, "taskweave starting");

    match cli.command {
        Command::Run {
            request,
            json,
            no_fallback,
        } => run_orchestrated(request, json, no_fallback),
        Command::Validate { file } => run_validate(file),
        Command::Direct { request } => run_direct(request),
    }
}

/// Run the full plan / execute / synthesize pipeline.
fn run_orchestrated(request: String, json: bool, no_fallback: bool) -> Result<()> {
    let config = Config::load()?;
    let model = Arc::new(CliModel::from_config(&config)?.with_cwd(env::current_dir()?));
    let orchestrator = Orchestrator::from_config(model, &config);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let cancel = cancel_on_ctrl_c();
        let (tx, printer) = spawn_printer(json, config.event_buffer);

        let result = if no_fallback {
            orchestrator.run(&request, &[], &tx, cancel).await
        } else {
            orchestrator
                .run_with_fallback(&request, &[], &tx, cancel)
                .await
        };

        drop(tx);
        let _ = printer.await;
        result
    });

    match result {
        Ok(summary) => {
            if json {
                print_summary_json(&summary)?;
            } else {
                println!();
                if summary.fell_back {
                    eprintln!("(planning failed, answered directly)");
                }
            }
            Ok(())
        }
        Err(Error::Cancelled) => {
            eprintln!();
            eprintln!("Cancelled.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn run_direct(request: String) -> Result<()> {
    let config = Config::load()?;
    let model = Arc::new(CliModel::from_config(&config)?.with_cwd(env::current_dir()?));
    let orchestrator = Orchestrator::from_config(model, &config);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let cancel = cancel_on_ctrl_c();
        let (tx, printer) = spawn_printer(false, config.event_buffer);
        let result = orchestrator.run_direct(&request, &[], &tx, cancel).await;
        drop(tx);
        let _ = printer.await;
        result
    });

    match result {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(Error::Cancelled) => {
            eprintln!();
            eprintln!("Cancelled.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Parse and validate a plan file without running it.
fn run_validate(file: PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(&file)?;
    let graph = parse_and_validate(&text)?;

    println!("Plan is valid: {} task(s), {} dependency edge(s)", graph.task_count(), graph.dependency_count());
    println!();

    let order: Vec<String> = graph
        .topological_order()
        .iter()
        .map(|id| id.to_string())
        .collect();
    println!("  Order: {}", order.join(" -> "));
    println!();

    for (i, wave) in graph.waves().iter().enumerate() {
        let ids: Vec<String> = wave.iter().map(|id| id.to_string()).collect();
        println!("  Wave {}: {}", i, ids.join(", "));
    }
    Ok(())
}

/// Cancellation token that fires on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });
    cancel
}

/// Spawn the task that presents output events as they arrive.
///
/// Answer text goes to stdout, progress to stderr.
fn spawn_printer(
    json: bool,
    capacity: usize,
) -> (mpsc::Sender<OutputEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OutputEvent>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                OutputEvent::Text(chunk) => {
                    if !json {
                        print!("{}", chunk);
                        let _ = io::stdout().flush();
                    }
                }
                OutputEvent::Progress(event) => {
                    if json {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    } else {
                        print_progress(&event);
                    }
                }
                OutputEvent::Phase(phase) => {
                    if !json && phase == RunPhase::Synthesizing {
                        eprintln!();
                    }
                }
            }
        }
    });
    (tx, handle)
}

fn print_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::PlanReady { plan } => {
            let tasks = serde_json::from_str::<serde_json::Value>(plan)
                .ok()
                .and_then(|v| v["tasks"].as_array().map(|t| t.len()))
                .unwrap_or(0);
            eprintln!("Plan ready: {} task(s)", tasks);
        }
        ProgressEvent::Task {
            task_id,
            status,
            error,
        } => match error {
            Some(error) => eprintln!("  [{}] {}: {}", status, task_id, error),
            None => eprintln!("  [{}] {}", status, task_id),
        },
        ProgressEvent::TaskOutput { .. } => {}
        ProgressEvent::StructuralError { reason } => eprintln!("Structural error: {}", reason),
        ProgressEvent::RunComplete => eprintln!("All tasks finished."),
        ProgressEvent::RunAborted { reason } => eprintln!("Run aborted: {}", reason),
    }
}

fn print_summary_json(summary: &RunSummary) -> Result<()> {
    let tasks = summary
        .report
        .as_ref()
        .map(|r| serde_json::to_value(&r.records))
        .transpose()?;
    let json_output = serde_json::json!({
        "answer": summary.answer,
        "fell_back": summary.fell_back,
        "run_id": summary.report.as_ref().map(|r| r.run_id.clone()),
        "waves": summary.report.as_ref().map(|r| r.waves.clone()),
        "tasks": tasks,
        "elapsed_ms": summary.report.as_ref().map(|r| r.elapsed.as_millis() as u64),
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}
