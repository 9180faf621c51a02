use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::orchestration::cli_model::DEFAULT_TIMEOUT_SECS;
use crate::orchestration::progress::DEFAULT_EVENT_BUFFER;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Model CLI invoked for every call, optionally with arguments.
    pub command: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub model_timeout_secs: u64,
    /// Forward each task's in-flight output chunks as progress events.
    #[serde(default)]
    pub forward_task_output: bool,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            model_timeout_secs: DEFAULT_TIMEOUT_SECS,
            forward_task_output: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Config {
    pub fn taskweave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskweave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskweave_dir()?.join("config.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            command = ?config.command,
            model_timeout_secs = config.model_timeout_secs,
            forward_task_output = config.forward_task_output,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}
