//! Newline-delimited JSON decoding for Ollama's streaming `/api/chat`.
//!
//! TCP chunks do not line up with JSON lines: one chunk may carry several
//! lines, and a line (or a multi-byte character) may be split across chunks.
//! Bytes are buffered until a full line is available.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use futures::stream::unfold;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::llm::error::LlmError;
use crate::llm::model::{FinishReason, ModelEvent, ModelStream, ModelToolCall};

/// Line buffer over raw bytes.
#[derive(Debug, Default)]
pub struct NdjsonLineBuffer {
    buffer: Vec<u8>,
}

impl NdjsonLineBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes, returning every complete non-empty line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = mem::replace(&mut self.buffer, rest);
            push_line(&mut lines, &line);
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn flush(&mut self) -> Vec<String> {
        let remaining = mem::take(&mut self.buffer);
        let mut lines = Vec::new();
        push_line(&mut lines, &remaining);
        lines
    }
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_owned());
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Stateful translation of chat chunks into model events.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    saw_tool_call: bool,
    finished: bool,
}

impl ChunkDecoder {
    /// Create a decoder for one response.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            saw_tool_call: false,
            finished: false,
        }
    }

    /// Whether a `done` chunk was seen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one JSON line.
    pub fn decode_line(&mut self, line: &str) -> Vec<Result<ModelEvent, LlmError>> {
        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(err) => return vec![Err(LlmError::Decode(format!("{err}: {line}")))],
        };

        if let Some(error) = chunk.error {
            return vec![Err(LlmError::Decode(error))];
        }

        let mut events = Vec::new();
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(Ok(ModelEvent::TextDelta(message.content)));
            }
            for call in message.tool_calls {
                self.saw_tool_call = true;
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                events.push(Ok(ModelEvent::ToolCall(ModelToolCall {
                    id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })));
            }
        }

        if chunk.done {
            self.finished = true;
            let reason = if self.saw_tool_call {
                FinishReason::ToolCalls
            } else {
                match chunk.done_reason.as_deref() {
                    None | Some("stop") => FinishReason::Stop,
                    Some("length") => FinishReason::Length,
                    Some(_) => FinishReason::Other,
                }
            };
            events.push(Ok(ModelEvent::Finish(reason)));
        }

        events
    }
}

struct StreamState {
    lines: NdjsonLineBuffer,
    decoder: ChunkDecoder,
    pending: VecDeque<Result<ModelEvent, LlmError>>,
    ended: bool,
}

impl StreamState {
    fn absorb(&mut self, lines: Vec<String>) {
        for line in lines {
            let events = self.decoder.decode_line(&line);
            self.pending.extend(events);
        }
    }
}

/// Wrap a raw byte stream into a stream of model events.
pub fn create_model_stream<S, B>(byte_stream: S) -> ModelStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        lines: NdjsonLineBuffer::new(),
        decoder: ChunkDecoder::new(),
        pending: VecDeque::new(),
        ended: false,
    };
    let source: Pin<Box<dyn Stream<Item = Result<B, reqwest::Error>> + Send>> =
        Box::pin(byte_stream);

    let stream = unfold((source, state), |(mut source, mut state)| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, (source, state)));
            }

            if state.ended {
                return None;
            }

            match source.next().await {
                Some(Ok(bytes)) => {
                    let lines = state.lines.feed(bytes.as_ref());
                    state.absorb(lines);
                }
                Some(Err(err)) => {
                    state.ended = true;
                    return Some((Err(LlmError::Http(err)), (source, state)));
                }
                None => {
                    state.ended = true;
                    let lines = state.lines.flush();
                    state.absorb(lines);
                    if !state.decoder.is_finished() {
                        state
                            .pending
                            .push_back(Ok(ModelEvent::Finish(FinishReason::Other)));
                    }
                }
            }
        }
    });

    Box::pin(stream)
}
