//! Name-indexed tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::ToolInvocation;
use crate::chat::tools::{Tool, ToolContext};
use crate::llm::model::{ModelToolCall, ToolDeclaration};

/// Result of one tool call, success or failure.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    /// Call identifier.
    pub tool_call_id: String,
    /// Tool name as requested.
    pub tool_name: String,
    /// Arguments as requested.
    pub args: Value,
    /// Result payload, or `{"error": ...}` on failure.
    pub result: Value,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolOutcome {
    /// Convert into the invocation stored on the assistant message.
    #[must_use]
    pub fn into_invocation(self) -> ToolInvocation {
        ToolInvocation {
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            args: self.args,
            result: Some(self.result),
            is_error: self.is_error,
        }
    }
}

/// Tools available to a turn.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    /// Declarations handed to the model.
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .values()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Validate and run one call. Failures become error outcomes.
    pub async fn invoke(&self, ctx: &ToolContext, call: &ModelToolCall) -> ToolOutcome {
        let (result, is_error) = match self.run(ctx, call).await {
            Ok(value) => (value, false),
            Err(err) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
                (json!({ "error": err.to_string() }), true)
            }
        };

        ToolOutcome {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.arguments.clone(),
            result,
            is_error,
        }
    }

    async fn run(&self, ctx: &ToolContext, call: &ModelToolCall) -> ChatResult<Value> {
        let tool = self
            .tools
            .get(call.name.as_str())
            .ok_or_else(|| ChatError::tool_failed(&call.name, "unknown tool"))?;

        tool.validate(&call.arguments)?;
        tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");
        tool.execute(ctx, call.arguments.clone()).await
    }
}
