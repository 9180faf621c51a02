//! Orchestration layer for taskweave.
//!
//! Turns one request into a plan of subtasks, runs the plan in dependency
//! waves against a [`ModelClient`], and synthesizes the task results into a
//! single streamed answer.

pub mod cli_model;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod prompts;
pub mod store;

pub use cli_model::{CliModel, DEFAULT_TIMEOUT_SECS};
pub use executor::{RunOutcome, RunReport, TaskExecutor};
pub use model::{collect_stream, ChunkStream, Message, ModelClient, ModelRequest, Role};
pub use orchestrator::{OutputEvent, Orchestrator, PhaseTracker, RunPhase, RunSummary};
pub use parser::{extract_payload, parse_and_validate, parse_plan};
pub use progress::{ProgressEvent, ProgressSender, ProgressStatus, DEFAULT_EVENT_BUFFER};
pub use store::{failure_placeholder, ResultStore};
