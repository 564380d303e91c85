//! Language model boundary: the [`ChatModel`] trait and its Ollama backend.

pub mod catalog;
pub mod error;
pub mod model;
pub mod ndjson;
pub mod ollama;

#[cfg(test)]
pub(crate) mod scripted;

pub use catalog::ModelCatalog;
pub use error::LlmError;
pub use model::{
    ChatModel, FinishReason, GenerateRequest, ModelEvent, ModelFuture, ModelMessage,
    ModelRequest, ModelRole, ModelStream, ModelToolCall, ToolDeclaration,
};
pub use ollama::OllamaChatModel;
