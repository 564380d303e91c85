//! Ollama backend for [`ChatModel`].
//!
//! One-shot generation goes through rig's Ollama completion model. Streaming
//! talks to `/api/chat` directly so tool calls and text increments arrive as
//! soon as the server produces them.

use std::time::Duration;

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;

use crate::chat::core::config::LlmConfig;
use crate::llm::error::LlmError;
use crate::llm::model::{
    ChatModel, GenerateRequest, ModelFuture, ModelMessage, ModelRequest, ModelRole, ModelStream,
    ToolDeclaration,
};
use crate::llm::ndjson::create_model_stream;

/// Target context length (tokens).
const CONTEXT_LENGTH: u32 = 8_192;

/// Keep the model loaded in memory between turns.
const KEEP_ALIVE: &str = "1h";

/// Connect timeout for the streaming client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest error body kept in [`LlmError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct ChatOptions {
    num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    keep_alive: &'a str,
    options: ChatOptions,
}

/// Ollama-backed chat model.
pub struct OllamaChatModel {
    http: ReqwestClient,
    base_url: Url,
    rig_client: ollama::Client<ReqwestClient>,
}

impl OllamaChatModel {
    /// Build a client for the configured Ollama server.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or a client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = Url::parse(&config.base_url)?;
        let http = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let rig_client = builder.base_url(config.base_url.as_str()).build()?;

        Ok(Self {
            http,
            base_url,
            rig_client,
        })
    }

    /// Whether the Ollama server answers `GET /api/version`.
    pub async fn is_ready(&self) -> bool {
        let Ok(url) = self.base_url.join("api/version") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "ollama readiness probe failed");
                false
            }
        }
    }

    async fn generate_inner(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let model = self.rig_client.completion_model(request.model.clone());
        let mut builder = model
            .completion_request(request.prompt)
            .preamble(request.system);
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        let response = model.completion(builder.build()).await?;
        let text = extract_text(&response.choice);
        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }

    async fn stream_inner(&self, request: ModelRequest) -> Result<ModelStream, LlmError> {
        let url = self.base_url.join("api/chat")?;
        let body = chat_request_body(&request);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening ollama chat stream"
        );

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(create_model_stream(response.bytes_stream()))
    }
}

impl ChatModel for OllamaChatModel {
    fn generate(&self, request: GenerateRequest) -> ModelFuture<'_, Result<String, LlmError>> {
        Box::pin(self.generate_inner(request))
    }

    fn stream(&self, request: ModelRequest) -> ModelFuture<'_, Result<ModelStream, LlmError>> {
        Box::pin(self.stream_inner(request))
    }
}

fn chat_request_body(request: &ModelRequest) -> ChatRequestBody<'_> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(request.messages.iter().map(message_json));

    ChatRequestBody {
        model: &request.model,
        messages,
        tools: request.tools.iter().map(tool_json).collect(),
        stream: true,
        keep_alive: KEEP_ALIVE,
        options: ChatOptions {
            num_ctx: CONTEXT_LENGTH,
            temperature: request.temperature,
        },
    }
}

fn message_json(message: &ModelMessage) -> Value {
    let role = match message.role {
        ModelRole::System => "system",
        ModelRole::User => "user",
        ModelRole::Assistant => "assistant",
        ModelRole::Tool => "tool",
    };
    let mut value = json!({ "role": role, "content": message.content });

    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "function": { "name": call.name, "arguments": call.arguments }
                })
            })
            .collect();
        value["tool_calls"] = Value::Array(calls);
    }
    if let Some(tool_name) = &message.tool_name {
        value["tool_name"] = Value::String(tool_name.clone());
    }
    value
}

fn tool_json(tool: &ToolDeclaration) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0)
}
