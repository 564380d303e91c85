//! Frames of the response stream and their line encoding.
//!
//! Each frame is one line: a one-character type code, a colon, a JSON value
//! and a newline. Clients built on the AI SDK data stream protocol (v1) read
//! this format directly.

use serde::Serialize;
use serde_json::{Value, json};

use crate::llm::model::FinishReason;

/// Response header announcing the data stream protocol.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

/// Protocol version sent in [`DATA_STREAM_HEADER`].
pub const DATA_STREAM_VERSION: &str = "v1";

/// Kind of a side-channel data event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataEventKind {
    /// Identifier of the document being drafted.
    Id,
    /// Title of the document being drafted.
    Title,
    /// Reset the client's document view.
    Clear,
    /// A chunk of document text.
    TextDelta,
    /// The document is complete.
    Finish,
}

/// A side-channel event, interleaved with the main text.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DataEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: DataEventKind,
    /// Event payload.
    pub content: String,
}

impl DataEvent {
    /// Build a data event.
    #[must_use]
    pub fn new(kind: DataEventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// One frame of the response stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
    /// A model step started.
    StartStep {
        /// Identifier of the assistant message the step produces.
        message_id: String,
    },
    /// A text increment.
    Text(String),
    /// Side-channel data.
    Data(DataEvent),
    /// The model requested a tool.
    ToolCall {
        /// Call identifier.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Raw arguments.
        args: Value,
    },
    /// A tool produced its result.
    ToolResult {
        /// Call identifier.
        tool_call_id: String,
        /// Result payload.
        result: Value,
    },
    /// Terminal error.
    Error(String),
    /// A model step ended.
    FinishStep {
        /// Why the step ended.
        finish_reason: FinishReason,
        /// Whether another step follows.
        is_continued: bool,
    },
    /// The turn ended.
    Finish {
        /// Why the turn ended.
        finish_reason: FinishReason,
    },
}

impl StreamFrame {
    /// One-character protocol code.
    #[must_use]
    pub const fn code(&self) -> char {
        match self {
            Self::StartStep { .. } => 'f',
            Self::Text(_) => '0',
            Self::Data(_) => '2',
            Self::ToolCall { .. } => '9',
            Self::ToolResult { .. } => 'a',
            Self::Error(_) => '3',
            Self::FinishStep { .. } => 'e',
            Self::Finish { .. } => 'd',
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        let value = match self {
            Self::StartStep { message_id } => json!({ "messageId": message_id }),
            Self::Text(text) | Self::Error(text) => Value::String(text.clone()),
            Self::Data(event) => Value::Array(vec![serde_json::to_value(event)?]),
            Self::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => json!({ "toolCallId": tool_call_id, "toolName": tool_name, "args": args }),
            Self::ToolResult {
                tool_call_id,
                result,
            } => json!({ "toolCallId": tool_call_id, "result": result }),
            Self::FinishStep {
                finish_reason,
                is_continued,
            } => json!({
                "finishReason": finish_reason.as_str(),
                "isContinued": is_continued,
            }),
            Self::Finish { finish_reason } => json!({ "finishReason": finish_reason.as_str() }),
        };
        Ok(value)
    }

    /// Encode as one newline-terminated protocol line.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(&self.payload()?)?;
        Ok(format!("{}:{payload}\n", self.code()))
    }
}
