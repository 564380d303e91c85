//! Normalization of incoming message shapes into canonical messages.
//!
//! Clients send either plain `{role, content: "..."}` messages, multi-part
//! content arrays, or UI messages carrying attachments and tool invocations
//! beside the content. Everything is folded into [`ChatMessage`] here and
//! nothing past this module sees the raw shapes.

use serde::Deserialize;
use serde_json::Value;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::{Attachment, ChatMessage, MessagePart, Role, ToolInvocation};

/// A message as received from the client.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// Client-side id, ignored.
    #[serde(default)]
    pub id: Option<String>,
    /// Author role.
    #[serde(default)]
    pub role: Option<String>,
    /// Plain or multi-part content.
    #[serde(default)]
    pub content: Option<RawContent>,
    /// UI attachments.
    #[serde(default, alias = "experimental_attachments")]
    pub experimental_attachments: Vec<RawAttachment>,
    /// UI tool invocations.
    #[serde(default)]
    pub tool_invocations: Vec<RawToolInvocation>,
}

/// Message content: a plain string or an array of typed parts.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    /// Plain text.
    Text(String),
    /// Typed parts.
    Parts(Vec<RawPart>),
}

/// A typed content part.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RawPart {
    /// Text segment.
    Text {
        /// Text content.
        text: String,
    },
    /// Image by URL or data URL.
    #[serde(rename_all = "camelCase")]
    Image {
        /// Image location.
        image: String,
        /// Optional MIME type.
        #[serde(default)]
        mime_type: Option<String>,
    },
    /// File by URL or data URL.
    #[serde(rename_all = "camelCase")]
    File {
        /// File location or inline data.
        data: String,
        /// Optional MIME type.
        #[serde(default)]
        mime_type: Option<String>,
        /// Optional file name.
        #[serde(default)]
        filename: Option<String>,
    },
    /// Tool call emitted by the assistant.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// Call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Arguments.
        #[serde(default)]
        args: Value,
    },
    /// Tool result.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        /// Call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Result payload.
        #[serde(default)]
        result: Value,
        /// Whether the result is an error.
        #[serde(default)]
        is_error: bool,
    },
    /// Any part type this service does not understand.
    #[serde(other)]
    Unknown,
}

/// A UI attachment.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttachment {
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Location.
    pub url: String,
}

/// A UI tool invocation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToolInvocation {
    /// `partial-call`, `call` or `result`.
    #[serde(default)]
    pub state: String,
    /// Call id.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Arguments.
    #[serde(default)]
    pub args: Value,
    /// Result, present once `state == "result"`.
    #[serde(default)]
    pub result: Option<Value>,
}

/// Decode untyped client messages, reporting the index of the first bad one.
///
/// # Errors
/// Returns `MalformedMessage` if a message does not have one of the accepted
/// shapes, such as a non-string role or object content.
pub fn parse_raw_messages(values: Vec<Value>) -> ChatResult<Vec<RawMessage>> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            RawMessage::deserialize(value).map_err(|err| ChatError::malformed(index, err.to_string()))
        })
        .collect()
}

/// Convert raw client messages into canonical messages, preserving order.
///
/// # Errors
/// Returns `MalformedMessage` if a message lacks a role, has an unknown role,
/// or has no content.
pub fn normalize_messages(raw: Vec<RawMessage>) -> ChatResult<Vec<ChatMessage>> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(raw.len());

    for (index, message) in raw.into_iter().enumerate() {
        let role = message
            .role
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .ok_or_else(|| ChatError::malformed(index, "missing role"))?
            .to_ascii_lowercase();
        let parts = collect_parts(message);

        if parts.is_empty() {
            return Err(ChatError::malformed(index, "empty content"));
        }

        match role.as_str() {
            "system" => out.push(ChatMessage::new(Role::System, parts)),
            "user" => out.push(ChatMessage::new(Role::User, parts)),
            "assistant" => out.push(ChatMessage::new(Role::Assistant, parts)),
            "tool" => fold_tool_message(&mut out, parts),
            other => return Err(ChatError::malformed(index, format!("unknown role {other}"))),
        }
    }

    Ok(out)
}

/// Return the last message authored by the user.
///
/// # Errors
/// Returns `NoUserMessage` if the history holds none.
pub fn most_recent_user_message(messages: &[ChatMessage]) -> ChatResult<&ChatMessage> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .ok_or(ChatError::NoUserMessage)
}

fn collect_parts(message: RawMessage) -> Vec<MessagePart> {
    let mut parts = Vec::new();

    match message.content {
        Some(RawContent::Text(text)) => push_text(&mut parts, text),
        Some(RawContent::Parts(raw_parts)) => {
            for part in raw_parts {
                match part {
                    RawPart::Text { text } => push_text(&mut parts, text),
                    RawPart::Image { image, mime_type } => parts.push(file_part(None, mime_type, image)),
                    RawPart::File {
                        data,
                        mime_type,
                        filename,
                    } => parts.push(file_part(filename, mime_type, data)),
                    RawPart::ToolCall {
                        tool_call_id,
                        tool_name,
                        args,
                    } => parts.push(MessagePart::tool_result(ToolInvocation {
                        tool_call_id,
                        tool_name,
                        args,
                        result: None,
                        is_error: false,
                    })),
                    RawPart::ToolResult {
                        tool_call_id,
                        tool_name,
                        result,
                        is_error,
                    } => parts.push(MessagePart::tool_result(ToolInvocation {
                        tool_call_id,
                        tool_name,
                        args: Value::Null,
                        result: Some(result),
                        is_error,
                    })),
                    RawPart::Unknown => {}
                }
            }
        }
        None => {}
    }

    for attachment in message.experimental_attachments {
        parts.push(file_part(attachment.name, attachment.content_type, attachment.url));
    }

    for invocation in message.tool_invocations {
        if invocation.state != "result" {
            continue;
        }
        if let Some(result) = invocation.result {
            parts.push(MessagePart::tool_result(ToolInvocation {
                tool_call_id: invocation.tool_call_id,
                tool_name: invocation.tool_name,
                args: invocation.args,
                result: Some(result),
                is_error: false,
            }));
        }
    }

    parts
}

fn push_text(parts: &mut Vec<MessagePart>, text: String) {
    if !text.trim().is_empty() {
        parts.push(MessagePart::Text { text });
    }
}

const fn file_part(name: Option<String>, content_type: Option<String>, url: String) -> MessagePart {
    MessagePart::Attachment {
        attachment: Attachment::File {
            name,
            content_type,
            url,
        },
    }
}

/// Tool-role messages carry results for calls made by the preceding
/// assistant message; merge them there instead of keeping a fourth role.
fn fold_tool_message(out: &mut Vec<ChatMessage>, parts: Vec<MessagePart>) {
    if !matches!(out.last(), Some(last) if last.role == Role::Assistant) {
        out.push(ChatMessage::new(Role::Assistant, Vec::new()));
    }
    let Some(target) = out.last_mut() else {
        return;
    };

    for part in parts {
        let MessagePart::Attachment {
            attachment: Attachment::ToolResult(result),
        } = part
        else {
            target.parts.push(part);
            continue;
        };

        let pending = target.parts.iter_mut().find_map(|existing| match existing {
            MessagePart::Attachment {
                attachment: Attachment::ToolResult(call),
            } if call.tool_call_id == result.tool_call_id && call.result.is_none() => Some(call),
            _ => None,
        });

        match pending {
            Some(call) => {
                call.result = result.result;
                call.is_error = result.is_error;
            }
            None => target.parts.push(MessagePart::tool_result(result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> Vec<RawMessage> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn wrongly_typed_fields_are_malformed_at_their_index() {
        for bad in [
            json!({"role": 5, "content": "hi"}),
            json!({"role": "user", "content": {"x": 1}}),
            json!({"role": "user", "content": [{"type": "text"}]}),
        ] {
            let values = vec![json!({"role": "user", "content": "ok"}), bad];
            let err = parse_raw_messages(values).unwrap_err();
            assert!(
                matches!(err, ChatError::MalformedMessage { index: 1, .. }),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn well_formed_values_parse() {
        let parsed = parse_raw_messages(vec![json!({"role": "user", "content": "hi"})]).unwrap();
        assert_eq!(parsed[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn plain_and_multipart_messages_normalize_in_order() {
        let messages = normalize_messages(raw(json!([
            {"role": "user", "content": "Hello"},
            {"role": "assistant", "content": [{"type": "text", "text": "Hi there"}]},
            {"role": "user", "content": [
                {"type": "text", "text": "Look at this"},
                {"type": "image", "image": "https://example.com/cat.png", "mimeType": "image/png"}
            ]}
        ])))
        .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "Hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].parts.len(), 2);
        assert!(matches!(
            messages[2].parts[1],
            MessagePart::Attachment {
                attachment: Attachment::File { .. }
            }
        ));
    }

    #[test]
    fn ui_attachments_and_tool_invocations_become_parts() {
        let messages = normalize_messages(raw(json!([
            {
                "role": "user",
                "content": "See file",
                "experimental_attachments": [{"name": "a.pdf", "contentType": "application/pdf", "url": "https://x/a.pdf"}]
            },
            {
                "role": "assistant",
                "content": "",
                "toolInvocations": [
                    {"state": "result", "toolCallId": "c1", "toolName": "getWeather", "args": {}, "result": {"t": 1}},
                    {"state": "call", "toolCallId": "c2", "toolName": "getWeather", "args": {}}
                ]
            }
        ])))
        .unwrap();

        assert_eq!(messages[0].parts.len(), 2);
        let invocations: Vec<_> = messages[1].tool_invocations().collect();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].tool_call_id, "c1");
    }

    #[test]
    fn tool_role_results_fold_into_pending_calls() {
        let messages = normalize_messages(raw(json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": [
                {"type": "tool-call", "toolCallId": "c1", "toolName": "getWeather", "args": {"latitude": 1, "longitude": 2}}
            ]},
            {"role": "tool", "content": [
                {"type": "tool-result", "toolCallId": "c1", "toolName": "getWeather", "result": {"t": 3}}
            ]}
        ])))
        .unwrap();

        assert_eq!(messages.len(), 2);
        let call = messages[1].tool_invocations().next().unwrap();
        assert_eq!(call.result, Some(json!({"t": 3})));
        assert_eq!(call.args, json!({"latitude": 1, "longitude": 2}));
    }

    #[test]
    fn missing_role_is_malformed() {
        let err = normalize_messages(raw(json!([{"content": "hi"}]))).unwrap_err();
        assert!(matches!(err, ChatError::MalformedMessage { index: 0, .. }));
    }

    #[test]
    fn empty_content_is_malformed() {
        let err = normalize_messages(raw(json!([
            {"role": "user", "content": "ok"},
            {"role": "user", "content": "   "}
        ])))
        .unwrap_err();
        assert!(matches!(err, ChatError::MalformedMessage { index: 1, .. }));
    }

    #[test]
    fn unknown_role_is_malformed() {
        let err = normalize_messages(raw(json!([{"role": "narrator", "content": "x"}]))).unwrap_err();
        assert!(matches!(err, ChatError::MalformedMessage { .. }));
    }

    #[test]
    fn most_recent_user_message_picks_last_user_entry() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
            ChatMessage::assistant("another reply"),
        ];
        let found = most_recent_user_message(&messages).unwrap();
        assert_eq!(found.text(), "second");
    }

    #[test]
    fn history_without_user_message_is_rejected() {
        let messages = vec![ChatMessage::assistant("hello?")];
        let err = most_recent_user_message(&messages).unwrap_err();
        assert!(matches!(err, ChatError::NoUserMessage));
    }
}
