//! Tools the model can call during a turn.

pub mod document;
pub mod registry;
pub mod weather;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::UserId;
use crate::chat::engine::sink::StreamSink;
use crate::chat::storage::DocumentStore;
use crate::llm::ChatModel;

pub use document::CreateDocumentTool;
pub use registry::{ToolOutcome, ToolRegistry};
pub use weather::{GetWeatherTool, OpenMeteoClient, WeatherSource};

/// Boxed future returned by tool execution.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ChatResult<Value>> + Send + 'a>>;

/// Per-turn resources a tool may use.
#[derive(Clone)]
pub struct ToolContext {
    /// User on whose behalf the turn runs.
    pub owner_id: UserId,
    /// Response stream for side-channel events.
    pub sink: StreamSink,
    /// Model used for nested generation.
    pub model: Arc<dyn ChatModel>,
    /// Backend name of the turn's model.
    pub model_name: String,
    /// Document storage.
    pub documents: Arc<dyn DocumentStore>,
}

/// A callable capability exposed to the model.
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &'static str;

    /// What the tool does, shown to the model.
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments.
    fn parameters(&self) -> Value;

    /// Check arguments before execution.
    ///
    /// # Errors
    /// Returns `InvalidToolParameters` if the arguments do not match the schema.
    fn validate(&self, args: &Value) -> ChatResult<()>;

    /// Run the tool.
    ///
    /// # Errors
    /// Returns `ToolExecution` if the tool fails.
    fn execute<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> ToolFuture<'a>;
}

/// Deserialize tool arguments into their typed form.
///
/// # Errors
/// Returns `InvalidToolParameters` if deserialization fails.
pub fn parse_params<T: DeserializeOwned>(tool: &str, args: &Value) -> ChatResult<T> {
    T::deserialize(args).map_err(|err| ChatError::InvalidToolParameters {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}
