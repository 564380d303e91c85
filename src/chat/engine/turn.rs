//! The per-turn model/tool loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId, UserId};
use crate::chat::core::message::{ChatMessage, MessagePart, Role};
use crate::chat::engine::context::{push_model_messages, to_model_messages};
use crate::chat::engine::frames::StreamFrame;
use crate::chat::engine::sink::StreamSink;
use crate::chat::engine::state::{StateTrace, TurnState};
use crate::chat::persistence::PersistenceCommitter;
use crate::chat::storage::DocumentStore;
use crate::chat::tools::{ToolContext, ToolRegistry};
use crate::llm::model::{
    ChatModel, FinishReason, ModelEvent, ModelMessage, ModelRequest, ModelStream,
};

/// Input of one turn.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Conversation the output is stored in.
    pub conversation_id: ConversationId,
    /// User on whose behalf the turn runs.
    pub owner_id: UserId,
    /// Backend model name.
    pub model_name: String,
    /// Canonical history, ending with the new user message.
    pub history: Vec<ChatMessage>,
}

/// What happened during a turn.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// Every state the turn passed through.
    pub states: Vec<TurnState>,
    /// Model steps started.
    pub steps: usize,
    /// Reason sent in the finish frame, or `Error`.
    pub finish_reason: FinishReason,
    /// Assistant messages of completed steps.
    pub messages: Vec<ChatMessage>,
    /// Messages actually persisted after sanitizing.
    pub persisted: usize,
    /// Terminal error, if any.
    pub error: Option<String>,
}

/// Tunables of the turn loop.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// System prompt of every step.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum model steps per turn.
    pub max_steps: usize,
    /// Ceiling on the whole turn, commit excluded.
    pub request_timeout: Duration,
}

/// Drives model steps and tool calls for one turn at a time.
pub struct TurnEngine {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    committer: PersistenceCommitter,
    documents: Arc<dyn DocumentStore>,
    settings: EngineSettings,
}

struct StepOutput {
    parts: Vec<MessagePart>,
    called_tools: bool,
    finish_reason: FinishReason,
    error: Option<ChatError>,
}

impl StepOutput {
    fn message(&self) -> Option<ChatMessage> {
        (!self.parts.is_empty()).then(|| ChatMessage::new(Role::Assistant, self.parts.clone()))
    }
}

impl TurnEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        committer: PersistenceCommitter,
        documents: Arc<dyn DocumentStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            model,
            tools,
            committer,
            documents,
            settings,
        }
    }

    /// Run a turn to completion, writing frames to `sink`.
    ///
    /// Never fails: errors after the stream opened become a terminal error
    /// frame. When the request ceiling elapses the current step is abandoned
    /// like a failed one and completed steps are still committed. The sink is
    /// closed on return.
    pub async fn run(&self, request: TurnRequest, sink: StreamSink) -> TurnOutcome {
        let deadline = Instant::now() + self.settings.request_timeout;
        let mut trace = StateTrace::default();
        let mut context = to_model_messages(&request.history);
        let mut produced = Vec::new();
        let mut steps = 0;
        let mut finish_reason = FinishReason::Stop;
        let mut failure = None;

        let tool_ctx = ToolContext {
            owner_id: request.owner_id,
            sink: sink.clone(),
            model: Arc::clone(&self.model),
            model_name: request.model_name.clone(),
            documents: Arc::clone(&self.documents),
        };

        while steps < self.settings.max_steps {
            steps += 1;
            trace.enter(TurnState::ModelStreaming);
            sink.send(StreamFrame::StartStep {
                message_id: MessageId::new().to_string(),
            });

            let opened = self
                .before_deadline(deadline, self.model.stream(self.step_request(&request, &context)))
                .await
                .and_then(|opened| opened.map_err(ChatError::from));
            let stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            let mut output = self
                .run_step(stream, deadline, &tool_ctx, &sink, &mut trace)
                .await;
            if let Some(err) = output.error.take() {
                // The interrupted step is not persisted; earlier steps are.
                failure = Some(err);
                break;
            }

            if let Some(message) = output.message() {
                push_model_messages(&mut context, &message);
                produced.push(message);
            }

            let continued = output.called_tools && steps < self.settings.max_steps;
            finish_reason = output.finish_reason;
            sink.send(StreamFrame::FinishStep {
                finish_reason,
                is_continued: continued,
            });
            if !continued {
                if output.called_tools {
                    tracing::info!(
                        conversation_id = %request.conversation_id,
                        max_steps = self.settings.max_steps,
                        "step budget exhausted"
                    );
                }
                break;
            }
        }

        trace.enter(TurnState::Finishing);
        let error = failure.map(|err| {
            tracing::warn!(conversation_id = %request.conversation_id, error = %err, "turn failed");
            let message = err.to_string();
            sink.send(StreamFrame::Error(message.clone()));
            finish_reason = FinishReason::Error;
            message
        });

        let persisted = self
            .committer
            .commit_assistant_messages(request.conversation_id, produced.clone())
            .await;

        if error.is_none() {
            sink.send(StreamFrame::Finish { finish_reason });
        }
        sink.close();
        trace.enter(TurnState::Closed);

        tracing::info!(
            conversation_id = %request.conversation_id,
            steps,
            persisted,
            finish_reason = finish_reason.as_str(),
            "turn complete"
        );

        TurnOutcome {
            states: trace.history().to_vec(),
            steps,
            finish_reason,
            messages: produced,
            persisted,
            error,
        }
    }

    fn step_request(&self, request: &TurnRequest, context: &[ModelMessage]) -> ModelRequest {
        ModelRequest {
            model: request.model_name.clone(),
            system: Some(self.settings.system_prompt.clone()),
            messages: context.to_vec(),
            tools: self.tools.declarations(),
            temperature: self.settings.temperature,
        }
    }

    async fn before_deadline<F: Future>(&self, deadline: Instant, future: F) -> ChatResult<F::Output> {
        tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| ChatError::Timeout(self.settings.request_timeout.as_secs()))
    }

    async fn run_step(
        &self,
        mut stream: ModelStream,
        deadline: Instant,
        tool_ctx: &ToolContext,
        sink: &StreamSink,
        trace: &mut StateTrace,
    ) -> StepOutput {
        let mut output = StepOutput {
            parts: Vec::new(),
            called_tools: false,
            finish_reason: FinishReason::Other,
            error: None,
        };
        let mut text = String::new();

        loop {
            let event = match self.before_deadline(deadline, stream.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    output.error = Some(err);
                    break;
                }
            };
            match event {
                Ok(ModelEvent::TextDelta(delta)) => {
                    sink.send(StreamFrame::Text(delta.clone()));
                    text.push_str(&delta);
                }
                Ok(ModelEvent::ToolCall(call)) => {
                    if !text.is_empty() {
                        output.parts.push(MessagePart::text(std::mem::take(&mut text)));
                    }
                    trace.enter(TurnState::ToolExecuting);
                    sink.send(StreamFrame::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.arguments.clone(),
                    });

                    let outcome = match self
                        .before_deadline(deadline, self.tools.invoke(tool_ctx, &call))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            output.error = Some(err);
                            break;
                        }
                    };
                    sink.send(StreamFrame::ToolResult {
                        tool_call_id: outcome.tool_call_id.clone(),
                        result: outcome.result.clone(),
                    });
                    output
                        .parts
                        .push(MessagePart::tool_result(outcome.into_invocation()));
                    output.called_tools = true;
                    trace.enter(TurnState::ModelStreaming);
                }
                Ok(ModelEvent::Finish(reason)) => {
                    output.finish_reason = reason;
                    break;
                }
                Err(err) => {
                    output.error = Some(ChatError::from(err));
                    break;
                }
            }
        }

        if !text.is_empty() {
            output.parts.push(MessagePart::text(text));
        }
        if output.called_tools {
            output.finish_reason = FinishReason::ToolCalls;
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::chat::core::conversation::Conversation;
    use crate::chat::storage::{
        ConversationStore, SqliteConversationStore, SqliteDocumentStore, open_in_memory,
    };
    use crate::chat::tools::registry::tests::EchoTool;
    use crate::chat::tools::{CreateDocumentTool, GetWeatherTool, ToolFuture, WeatherSource};
    use crate::llm::scripted::ScriptedModel;

    struct SunnyWeather;

    impl WeatherSource for SunnyWeather {
        fn forecast(&self, _latitude: f64, _longitude: f64) -> ToolFuture<'_> {
            Box::pin(async { Ok(json!({"current": {"temperature_2m": 18.0}})) })
        }
    }

    struct Harness {
        engine: TurnEngine,
        model: Arc<ScriptedModel>,
        conversations: Arc<SqliteConversationStore>,
        conversation: Conversation,
    }

    async fn harness(model: ScriptedModel, max_steps: usize) -> Harness {
        let conn = open_in_memory().await.unwrap();
        let conversations = Arc::new(SqliteConversationStore::new(conn.clone()));
        let documents = Arc::new(SqliteDocumentStore::new(conn));
        let conversation = Conversation::new(ConversationId::new(), UserId::new(), "t");
        conversations.create(&conversation).await.unwrap();

        let model = Arc::new(model);
        let tools = ToolRegistry::new()
            .with_tool(Arc::new(EchoTool))
            .with_tool(Arc::new(GetWeatherTool::new(Arc::new(SunnyWeather))))
            .with_tool(Arc::new(CreateDocumentTool));
        let engine = TurnEngine::new(
            model.clone(),
            tools,
            PersistenceCommitter::new(conversations.clone()),
            documents,
            EngineSettings {
                system_prompt: "be helpful".to_string(),
                temperature: None,
                max_steps,
                request_timeout: Duration::from_secs(30),
            },
        );
        Harness {
            engine,
            model,
            conversations,
            conversation,
        }
    }

    impl Harness {
        fn request(&self, text: &str) -> TurnRequest {
            TurnRequest {
                conversation_id: self.conversation.id,
                owner_id: self.conversation.owner_id,
                model_name: "test-model".to_string(),
                history: vec![ChatMessage::user(text)],
            }
        }

        async fn run(&self, text: &str) -> (TurnOutcome, Vec<StreamFrame>) {
            let (sink, rx) = StreamSink::channel();
            let outcome = self.engine.run(self.request(text), sink).await;
            (outcome, drain(rx))
        }
    }

    fn drain(mut rx: UnboundedReceiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn codes(frames: &[StreamFrame]) -> String {
        frames.iter().map(StreamFrame::code).collect()
    }

    #[tokio::test]
    async fn plain_answer_streams_text_and_persists() {
        let h = harness(
            ScriptedModel::new().events_step(vec![
                ModelEvent::TextDelta("Hel".to_string()),
                ModelEvent::TextDelta("lo!".to_string()),
                ModelEvent::Finish(FinishReason::Stop),
            ]),
            5,
        )
        .await;

        let (outcome, frames) = h.run("hi").await;
        assert_eq!(codes(&frames), "f00ed");
        assert_eq!(frames[1], StreamFrame::Text("Hel".to_string()));
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(outcome.persisted, 1);
        assert_eq!(
            outcome.states,
            vec![
                TurnState::Idle,
                TurnState::ModelStreaming,
                TurnState::Finishing,
                TurnState::Closed
            ]
        );

        let stored = h.conversations.load_messages(h.conversation.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Hello!");
    }

    #[tokio::test]
    async fn weather_tool_round_trip_takes_two_steps() {
        let h = harness(
            ScriptedModel::new()
                .tool_step("call_1", "getWeather", json!({"latitude": 37.77, "longitude": -122.42}))
                .text_step("It is 18 degrees."),
            5,
        )
        .await;

        let (outcome, frames) = h.run("weather in SF?").await;
        assert_eq!(codes(&frames), "f9aef0ed");
        assert_eq!(outcome.steps, 2);
        assert!(outcome.states.contains(&TurnState::ToolExecuting));

        let StreamFrame::ToolResult { result, .. } = &frames[2] else {
            panic!("expected a tool result frame");
        };
        assert_eq!(result["current"]["temperature_2m"], 18.0);

        let second = &h.model.requests()[1];
        let tool_message = second
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
            .unwrap();
        assert!(tool_message.content.contains("temperature_2m"));

        let stored = h.conversations.load_messages(h.conversation.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        let first = stored[0].to_chat();
        assert_eq!(first.tool_invocations().count(), 1);
    }

    #[tokio::test]
    async fn step_budget_stops_a_tool_loop() {
        let mut model = ScriptedModel::new();
        for i in 0..10 {
            model = model.tool_step(&format!("call_{i}"), "echo", json!({"text": "again"}));
        }
        let h = harness(model, 3).await;

        let (outcome, frames) = h.run("loop").await;
        assert_eq!(outcome.steps, 3);
        assert_eq!(h.model.requests().len(), 3);
        assert_eq!(outcome.finish_reason, FinishReason::ToolCalls);
        let starts = frames
            .iter()
            .filter(|f| matches!(f, StreamFrame::StartStep { .. }))
            .count();
        assert_eq!(starts, 3);
        assert_eq!(
            frames.last(),
            Some(&StreamFrame::Finish {
                finish_reason: FinishReason::ToolCalls
            })
        );
        let StreamFrame::FinishStep { is_continued, .. } = &frames[frames.len() - 2] else {
            panic!("expected a finish-step frame");
        };
        assert!(!is_continued);
    }

    #[tokio::test]
    async fn failing_tool_does_not_end_the_turn() {
        let h = harness(
            ScriptedModel::new()
                .tool_step("call_1", "echo", json!({"text": "fail"}))
                .text_step("Sorry, that failed."),
            5,
        )
        .await;

        let (outcome, frames) = h.run("try it").await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.steps, 2);
        let StreamFrame::ToolResult { result, .. } = &frames[2] else {
            panic!("expected a tool result frame");
        };
        assert!(result.get("error").is_some());
        assert!(matches!(frames.last(), Some(StreamFrame::Finish { .. })));
    }

    #[tokio::test]
    async fn unavailable_model_emits_an_error_and_commits_nothing() {
        let h = harness(ScriptedModel::new().failing_step("connection refused"), 5).await;

        let (outcome, frames) = h.run("hi").await;
        assert_eq!(codes(&frames), "f3");
        let StreamFrame::Error(message) = &frames[1] else {
            panic!("expected an error frame");
        };
        assert!(message.contains("model unavailable"));
        assert_eq!(outcome.finish_reason, FinishReason::Error);
        assert_eq!(outcome.persisted, 0);
        assert!(h.conversations.load_messages(h.conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_step_failure_keeps_completed_steps() {
        let h = harness(
            ScriptedModel::new()
                .tool_step("call_1", "echo", json!({"text": "one"}))
                .broken_step(vec![ModelEvent::TextDelta("partial".to_string())], "reset"),
            5,
        )
        .await;

        let (outcome, frames) = h.run("go").await;
        assert!(outcome.error.is_some());
        assert_eq!(outcome.persisted, 1);
        assert_eq!(frames.last().map(StreamFrame::code), Some('3'));

        let stored = h.conversations.load_messages(h.conversation.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].content.contains("partial"));
    }

    #[tokio::test]
    async fn disconnected_client_still_gets_the_turn_persisted() {
        let h = harness(ScriptedModel::new().text_step("Saved anyway."), 5).await;
        let (sink, rx) = StreamSink::channel();
        drop(rx);

        let outcome = h.engine.run(h.request("hi"), sink).await;
        assert_eq!(outcome.persisted, 1);
        let stored = h.conversations.load_messages(h.conversation.id).await.unwrap();
        assert_eq!(stored[0].content, "Saved anyway.");
    }

    #[tokio::test]
    async fn document_tool_interleaves_side_channel_data() {
        let h = harness(
            ScriptedModel::new()
                .tool_step("call_1", "createDocument", json!({"title": "Rust ownership"}))
                .text_step("# Ownership\nEach value has one owner.")
                .text_step("I wrote the document."),
            5,
        )
        .await;

        let (outcome, frames) = h.run("write about rust ownership").await;
        assert!(outcome.error.is_none());
        assert_eq!(codes(&frames), "f922222aef0ed");

        let StreamFrame::ToolResult { result, .. } = &frames[7] else {
            panic!("expected a tool result frame");
        };
        assert_eq!(result["content"], Value::from("Document created successfully"));
    }
}
