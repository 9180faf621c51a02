use thiserror::Error;

use crate::core::PlanError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Model binary not found: {0}")]
    ModelBinaryNotFound(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Model response did not contain a plan")]
    NoPlan,

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Scheduler stalled: {0}")]
    Structural(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

impl Error {
    /// Whether the caller should fall back to a direct, non-orchestrated call.
    pub fn is_plan_failure(&self) -> bool {
        matches!(self, Error::NoPlan | Error::InvalidPlan(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
