//! Canonical message model shared by every chat component.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId};

/// Role of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A tool call together with its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Call identifier assigned by the model (or generated).
    pub tool_call_id: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments as sent by the model.
    pub args: serde_json::Value,
    /// Result payload; `None` while the call is still pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Whether `result` describes a failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolInvocation {
    /// Whether the invocation carries a result.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.result.is_some()
    }
}

/// Non-text content attached to a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Attachment {
    /// A file or image referenced by URL (possibly a data URL).
    File {
        /// Optional display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Optional MIME type.
        #[serde(
            default,
            rename = "contentType",
            skip_serializing_if = "Option::is_none"
        )]
        content_type: Option<String>,
        /// Location of the content.
        url: String,
    },
    /// The outcome of a tool call folded into an assistant message.
    ToolResult(ToolInvocation),
}

/// One part of a message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// A text segment.
    Text {
        /// Text content.
        text: String,
    },
    /// An attachment.
    Attachment {
        /// Attachment payload.
        attachment: Attachment,
    },
}

impl MessagePart {
    /// Build a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build a tool-result attachment part.
    #[must_use]
    pub const fn tool_result(invocation: ToolInvocation) -> Self {
        Self::Attachment {
            attachment: Attachment::ToolResult(invocation),
        }
    }

    /// Borrow the text if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Attachment { .. } => None,
        }
    }

    /// Borrow the tool invocation if this is a tool-result attachment.
    #[must_use]
    pub const fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::Attachment {
                attachment: Attachment::ToolResult(invocation),
            } => Some(invocation),
            _ => None,
        }
    }
}

/// A canonical role-tagged message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the author.
    pub role: Role,
    /// Ordered content parts.
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    /// Build a message.
    #[must_use]
    pub const fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self { role, parts }
    }

    /// Build a single-text user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::text(text)])
    }

    /// Build a single-text assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MessagePart::text(text)])
    }

    /// Concatenation of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(MessagePart::as_text).collect()
    }

    /// Tool invocations folded into this message.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(MessagePart::as_tool_invocation)
    }

    /// Flatten the content to a storable string.
    ///
    /// A message made of exactly one text part is stored verbatim, unless the
    /// text starts with `[` and could be read back as parts. Anything else is
    /// stored as the JSON array of its parts.
    ///
    /// # Errors
    /// Returns an error if the parts cannot be serialized.
    pub fn flatten_content(&self) -> ChatResult<String> {
        match self.parts.as_slice() {
            [MessagePart::Text { text }] if !looks_like_parts(text) => Ok(text.clone()),
            parts => Ok(serde_json::to_string(parts)?),
        }
    }

    /// Rebuild a message from its flattened storage form.
    #[must_use]
    pub fn from_flattened(role: Role, content: &str) -> Self {
        if looks_like_parts(content) {
            if let Ok(parts) = serde_json::from_str::<Vec<MessagePart>>(content) {
                return Self::new(role, parts);
            }
        }
        Self::new(role, vec![MessagePart::text(content)])
    }
}

fn looks_like_parts(content: &str) -> bool {
    content.trim_start().starts_with('[')
}

/// A message as persisted in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Role of the author.
    pub role: Role,
    /// Flattened content.
    pub content: String,
    /// Creation timestamp; strictly increasing within a conversation.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Prepare a canonical message for storage.
    ///
    /// `created_at` is a lower bound; the store may push it forward to keep
    /// per-conversation timestamps strictly increasing.
    ///
    /// # Errors
    /// Returns an error if the content cannot be flattened.
    pub fn from_chat(conversation_id: ConversationId, message: &ChatMessage) -> ChatResult<Self> {
        Ok(Self {
            id: MessageId::new(),
            conversation_id,
            role: message.role,
            content: message.flatten_content()?,
            created_at: Utc::now(),
        })
    }

    /// Decode back into a canonical message.
    #[must_use]
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::from_flattened(self.role, &self.content)
    }
}

/// Parse a stored role string.
///
/// # Errors
/// Returns an error for unknown roles.
pub fn parse_role(value: &str) -> ChatResult<Role> {
    Role::from_str(value).map_err(|err| ChatError::Persistence(format!("invalid role: {err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn single_text_flattens_verbatim() {
        let message = ChatMessage::user("Hello");
        assert_eq!(message.flatten_content().unwrap(), "Hello");
    }

    #[test]
    fn multi_part_flattens_to_json_and_back() {
        let message = ChatMessage::new(
            Role::Assistant,
            vec![
                MessagePart::text("Checking."),
                MessagePart::tool_result(ToolInvocation {
                    tool_call_id: "call_1".to_string(),
                    tool_name: "getWeather".to_string(),
                    args: json!({"latitude": 10.0, "longitude": 20.0}),
                    result: Some(json!({"current": {"temperature_2m": 21.5}})),
                    is_error: false,
                }),
            ],
        );

        let flat = message.flatten_content().unwrap();
        assert!(flat.starts_with('['));
        assert!(flat.contains("\"kind\":\"tool-result\""));

        let restored = ChatMessage::from_flattened(Role::Assistant, &flat);
        assert_eq!(restored, message);
    }

    #[test]
    fn text_shaped_like_parts_round_trips() {
        for text in ["[]", "  [1, 2]", r#"[{"type":"text","text":"x"}]"#] {
            let message = ChatMessage::user(text);
            let flat = message.flatten_content().unwrap();
            assert_ne!(flat, text);
            assert_eq!(ChatMessage::from_flattened(Role::User, &flat), message);
        }
    }

    #[test]
    fn bracketed_plain_text_survives() {
        let restored = ChatMessage::from_flattened(Role::User, "[not json");
        assert_eq!(restored.text(), "[not json");
    }

    #[test]
    fn role_parses_from_storage_form() {
        assert_eq!(parse_role("assistant").unwrap(), Role::Assistant);
        assert!(parse_role("tool").is_err());
    }
}
