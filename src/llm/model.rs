//! Backend-agnostic model interface used by the chat core.
//!
//! The chat engine only sees [`ChatModel`]: a one-shot text generation call
//! (used for titles) and a streaming call that yields text increments and
//! tool-call requests. Providers translate to and from their wire formats.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::error::LlmError;

/// Boxed future type for model operations.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of incremental model events.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, LlmError>> + Send>>;

/// Role of a message sent to the model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// System instruction.
    System,
    /// User input.
    User,
    /// Assistant output.
    Assistant,
    /// Tool result.
    Tool,
}

/// A tool call requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    /// Call id, unique within the turn.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: Value,
}

/// One message of the model context.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelMessage {
    /// Role.
    pub role: ModelRole,
    /// Text content.
    pub content: String,
    /// Tool calls made by an assistant message.
    pub tool_calls: Vec<ModelToolCall>,
    /// For tool messages, the call this result answers.
    pub tool_call_id: Option<String>,
    /// For tool messages, the tool that produced the result.
    pub tool_name: Option<String>,
}

impl ModelMessage {
    fn plain(role: ModelRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// A system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ModelRole::System, content)
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ModelRole::User, content)
    }

    /// An assistant message, optionally carrying tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ModelToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ModelRole::Assistant, content)
        }
    }

    /// A tool result answering `call`.
    #[must_use]
    pub fn tool_result(call_id: &str, tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            tool_name: Some(tool_name.to_string()),
            ..Self::plain(ModelRole::Tool, content)
        }
    }
}

/// Declaration of a tool the model may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

/// A streaming chat request.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    /// Backend model name.
    pub model: String,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Context messages, oldest first.
    pub messages: Vec<ModelMessage>,
    /// Tools the model may call.
    pub tools: Vec<ToolDeclaration>,
    /// Optional sampling temperature.
    pub temperature: Option<f64>,
}

/// A one-shot, non-streaming generation request.
#[derive(Clone, Debug, Default)]
pub struct GenerateRequest {
    /// Backend model name.
    pub model: String,
    /// System instruction.
    pub system: String,
    /// Prompt.
    pub prompt: String,
    /// Optional sampling temperature.
    pub temperature: Option<f64>,
}

/// Why the model stopped a step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural end of output.
    Stop,
    /// Output ended to let tools run.
    ToolCalls,
    /// Token limit reached.
    Length,
    /// The turn ended on an error.
    Error,
    /// Anything else.
    Other,
}

impl FinishReason {
    /// Wire form used in finish frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool-calls",
            Self::Length => "length",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

/// One increment of a streaming response.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    /// A text increment, forwarded as-is.
    TextDelta(String),
    /// The model asks for a tool.
    ToolCall(ModelToolCall),
    /// The step ended.
    Finish(FinishReason),
}

/// Trait abstraction over chat-capable language models.
pub trait ChatModel: Send + Sync {
    /// Generate a complete response without streaming.
    ///
    /// # Errors
    /// Returns an error if the backend is unreachable or the response is malformed.
    fn generate(&self, request: GenerateRequest) -> ModelFuture<'_, Result<String, LlmError>>;

    /// Open a streaming response.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened; failures after that
    /// arrive as `Err` items on the stream.
    fn stream(&self, request: ModelRequest) -> ModelFuture<'_, Result<ModelStream, LlmError>>;
}
