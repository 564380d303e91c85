//! `createDocument`: drafts a Markdown document with a nested model call,
//! streaming it to the client over the side channel.

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::chat::core::conversation::Document;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::DocumentId;
use crate::chat::engine::frames::{DataEvent, DataEventKind};
use crate::chat::tools::{Tool, ToolContext, ToolFuture, parse_params};
use crate::llm::model::{ModelEvent, ModelMessage, ModelRequest};

const TOOL_NAME: &str = "createDocument";

const DOCUMENT_SYSTEM_PROMPT: &str =
    "Write about the given topic. Markdown is supported. Use headings wherever appropriate.";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentParams {
    title: String,
}

impl DocumentParams {
    fn parse(args: &Value) -> ChatResult<Self> {
        let params: Self = parse_params(TOOL_NAME, args)?;
        if params.title.trim().is_empty() {
            return Err(ChatError::InvalidToolParameters {
                tool: TOOL_NAME.to_string(),
                reason: "title must not be empty".to_string(),
            });
        }
        Ok(params)
    }
}

/// Creates a document about a topic.
#[derive(Debug, Default)]
pub struct CreateDocumentTool;

impl CreateDocumentTool {
    async fn draft(ctx: &ToolContext, id: DocumentId, title: &str) -> ChatResult<String> {
        ctx.sink.data(DataEvent::new(DataEventKind::Id, id.to_string()));
        ctx.sink.data(DataEvent::new(DataEventKind::Title, title));
        ctx.sink.data(DataEvent::new(DataEventKind::Clear, ""));

        let request = ModelRequest {
            model: ctx.model_name.clone(),
            system: Some(DOCUMENT_SYSTEM_PROMPT.to_string()),
            messages: vec![ModelMessage::user(title)],
            ..ModelRequest::default()
        };

        let mut stream = ctx
            .model
            .stream(request)
            .await
            .map_err(|err| ChatError::tool_failed(TOOL_NAME, err))?;

        let mut content = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|err| ChatError::tool_failed(TOOL_NAME, err))? {
                ModelEvent::TextDelta(delta) => {
                    content.push_str(&delta);
                    ctx.sink.data(DataEvent::new(DataEventKind::TextDelta, delta));
                }
                ModelEvent::ToolCall(call) => {
                    tracing::debug!(tool = %call.name, "ignoring tool call in document draft");
                }
                ModelEvent::Finish(_) => break,
            }
        }

        Ok(content)
    }
}

impl Tool for CreateDocumentTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Create a document for a writing activity"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "minLength": 1 }
            },
            "required": ["title"]
        })
    }

    fn validate(&self, args: &Value) -> ChatResult<()> {
        DocumentParams::parse(args).map(|_| ())
    }

    fn execute<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let DocumentParams { title } = DocumentParams::parse(&args)?;
            let id = DocumentId::new();

            let drafted = Self::draft(ctx, id, &title).await;
            // The client's document view is closed even when drafting failed.
            ctx.sink.data(DataEvent::new(DataEventKind::Finish, ""));
            let content = drafted?;

            let document = Document {
                id,
                owner_id: ctx.owner_id,
                title: title.clone(),
                content,
                created_at: Utc::now(),
            };
            ctx.documents
                .save(&document)
                .await
                .map_err(|err| ChatError::tool_failed(TOOL_NAME, err))?;

            tracing::info!(document_id = %id, "document created");
            Ok(json!({
                "id": id.to_string(),
                "title": title,
                "content": "Document created successfully",
            }))
        })
    }
}
