//! The model capability consumed by the executor and orchestrator.
//!
//! Everything about talking to a model (transport, prompt formatting, retry)
//! sits behind [`ModelClient`]. The core only asks for a stream of text
//! chunks and either drains it or propagates its error.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Stream of output chunks from one model call.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Speaker of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One prior message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

/// Input for a single model call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    /// The instruction to answer.
    pub instruction: String,
    /// Prior conversation, oldest first.
    pub history: Vec<Message>,
    /// Free-form workspace/context hints passed through untouched.
    pub hints: BTreeMap<String, String>,
}

impl ModelRequest {
    /// A request with no history or hints.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    /// Attach conversation history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Attach context hints.
    pub fn with_hints(mut self, hints: BTreeMap<String, String>) -> Self {
        self.hints = hints;
        self
    }

    /// Flatten into a single prompt for text-only backends.
    pub fn render(&self) -> String {
        let mut prompt = String::new();
        if !self.hints.is_empty() {
            prompt.push_str("Context:\n");
            for (key, value) in &self.hints {
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
            prompt.push('\n');
        }
        if !self.history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for message in &self.history {
                prompt.push_str(&format!("{}: {}\n", message.role, message.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&self.instruction);
        prompt
    }
}

/// An asynchronous text-generation capability.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start generating a response to `request`.
    ///
    /// Implementations should stop producing output and end the stream with
    /// an error once `cancel` fires.
    async fn generate(&self, request: ModelRequest, cancel: CancellationToken)
        -> Result<ChunkStream>;
}

/// Drain a chunk stream into one string.
///
/// Each chunk is passed to `on_chunk` as it arrives. Cancellation ends the
/// drain with [`Error::Cancelled`].
pub async fn collect_stream<F>(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<String>
where
    F: FnMut(&str),
{
    let mut output = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                on_chunk(&chunk);
                output.push_str(&chunk);
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(output),
        }
    }
}
