//! Model CLI headless client.
//!
//! `CliModel` runs a model command-line tool in non-interactive mode
//! (`<command> -p <prompt>`) and streams its stdout back line by line. The
//! call is bounded by a timeout and killed when the run is cancelled; both
//! surface as errors on the stream, which the executor records as an
//! ordinary task failure.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestration::model::{ChunkStream, ModelClient, ModelRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default timeout for one model call (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Runs a model CLI once per request.
#[derive(Debug, Clone)]
pub struct CliModel {
    /// Path to the model binary.
    binary: PathBuf,
    /// Extra arguments placed before `-p <prompt>`.
    args: Vec<String>,
    /// Timeout for one call.
    timeout: Duration,
    /// Working directory for the child process.
    cwd: Option<PathBuf>,
}

impl CliModel {
    /// Build a client from the configured command.
    ///
    /// The command may carry arguments (`"claude --model sonnet"`); the
    /// program is resolved on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be found.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut parts = config.effective_command().split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::ModelBinaryNotFound(String::new()))?;
        let binary =
            which::which(program).map_err(|_| Error::ModelBinaryNotFound(program.to_string()))?;
        Ok(Self {
            binary,
            args: parts.map(str::to_string).collect(),
            timeout: Duration::from_secs(config.model_timeout_secs),
            cwd: None,
        })
    }

    /// Create a client for a specific binary path.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cwd: None,
        }
    }

    /// Set extra arguments placed before the prompt flag.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set a custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the child process in `cwd`.
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Get the binary path.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Get the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn spawn(&self, prompt: &str) -> Result<Child> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .arg("-p")
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        Ok(command.spawn()?)
    }
}

#[async_trait]
impl ModelClient for CliModel {
    async fn generate(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let mut child = self.spawn(&request.render())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Model("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Model("child stderr not captured".to_string()))?;

        debug!(binary = %self.binary.display(), "model process spawned");

        let (tx, rx) = mpsc::channel::<Result<String>>(64);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let stderr_task = tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            });

            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut lines = BufReader::new(stdout).lines();

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        let _ = tx.send(Err(Error::Cancelled)).await;
                        return;
                    }
                    _ = &mut deadline => {
                        warn!(?timeout, "model process timed out");
                        let _ = child.kill().await;
                        let _ = tx.send(Err(Error::Timeout(timeout))).await;
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(Ok(format!("{}\n", line))).await.is_err() {
                                // Consumer went away; nobody wants the rest.
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = child.kill().await;
                            let _ = tx.send(Err(Error::Io(e))).await;
                            return;
                        }
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let stderr_text = stderr_task.await.unwrap_or_default();
                    let message = if stderr_text.trim().is_empty() {
                        format!(
                            "model process failed with exit code {}",
                            status.code().unwrap_or(-1)
                        )
                    } else {
                        stderr_text.trim().to_string()
                    };
                    let _ = tx.send(Err(Error::Model(message))).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(Error::Io(e))).await;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}
