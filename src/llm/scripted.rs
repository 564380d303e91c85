//! Deterministic [`ChatModel`] used by tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream;

use crate::llm::error::LlmError;
use crate::llm::model::{
    ChatModel, FinishReason, GenerateRequest, ModelEvent, ModelFuture, ModelRequest, ModelStream,
    ModelToolCall,
};

enum Step {
    Events(Vec<Result<ModelEvent, LlmError>>),
    FailOpen(String),
    Stall(Vec<ModelEvent>),
}

/// Replays scripted steps and records every request it receives.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    titles: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<ModelRequest>>,
    generations: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A step that streams `text` and stops.
    pub(crate) fn text_step(self, text: &str) -> Self {
        self.events_step(vec![
            ModelEvent::TextDelta(text.to_string()),
            ModelEvent::Finish(FinishReason::Stop),
        ])
    }

    /// A step that requests one tool call.
    pub(crate) fn tool_step(self, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        self.events_step(vec![
            ModelEvent::ToolCall(ModelToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }),
            ModelEvent::Finish(FinishReason::ToolCalls),
        ])
    }

    pub(crate) fn events_step(self, events: Vec<ModelEvent>) -> Self {
        self.push(Step::Events(events.into_iter().map(Ok).collect()))
    }

    /// A step that streams `events` and then fails mid-stream.
    pub(crate) fn broken_step(self, events: Vec<ModelEvent>, error: &str) -> Self {
        let mut items: Vec<_> = events.into_iter().map(Ok).collect();
        items.push(Err(LlmError::Decode(error.to_string())));
        self.push(Step::Events(items))
    }

    /// A step whose stream cannot be opened.
    pub(crate) fn failing_step(self, error: &str) -> Self {
        self.push(Step::FailOpen(error.to_string()))
    }

    /// A step that streams `events` and then never finishes.
    pub(crate) fn stalled_step(self, events: Vec<ModelEvent>) -> Self {
        self.push(Step::Stall(events))
    }

    pub(crate) fn title(self, title: &str) -> Self {
        self.push_title(Ok(title.to_string()))
    }

    pub(crate) fn failing_title(self, error: &str) -> Self {
        self.push_title(Err(error.to_string()))
    }

    pub(crate) fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn generations(&self) -> Vec<GenerateRequest> {
        self.generations.lock().unwrap().clone()
    }

    fn push(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    fn push_title(self, title: Result<String, String>) -> Self {
        self.titles.lock().unwrap().push_back(title);
        self
    }
}

impl ChatModel for ScriptedModel {
    fn generate(&self, request: GenerateRequest) -> ModelFuture<'_, Result<String, LlmError>> {
        self.generations.lock().unwrap().push(request);
        let next = self.titles.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(error)) => Err(LlmError::Decode(error)),
                None => Ok("Untitled chat".to_string()),
            }
        })
    }

    fn stream(&self, request: ModelRequest) -> ModelFuture<'_, Result<ModelStream, LlmError>> {
        self.requests.lock().unwrap().push(request);
        let next = self.steps.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Step::Events(items)) => Ok(Box::pin(stream::iter(items)) as ModelStream),
                Some(Step::FailOpen(error)) => Err(LlmError::Decode(error)),
                Some(Step::Stall(events)) => {
                    let head = stream::iter(events.into_iter().map(Ok));
                    Ok(Box::pin(futures::StreamExt::chain(head, stream::pending()))
                        as ModelStream)
                }
                None => Ok(Box::pin(stream::iter(vec![Ok(ModelEvent::Finish(
                    FinishReason::Stop,
                ))])) as ModelStream),
            }
        })
    }
}
