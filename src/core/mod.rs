//! Core domain models for taskweave.
//!
//! This module contains the plan data structures and the validated task
//! graph the executor schedules from.

pub mod dag;
pub mod plan;
pub mod task;

pub use dag::{validate, PlanError, TaskGraph, ValidationReport};
pub use plan::Plan;
pub use task::{TaskId, TaskKind, TaskNode, TaskRecord, TaskState};
