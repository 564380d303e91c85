//! Translation of canonical messages into model context.

use crate::chat::core::message::{Attachment, ChatMessage, MessagePart, Role};
use crate::llm::model::{ModelMessage, ModelToolCall};

/// Convert a canonical history into model messages, oldest first.
#[must_use]
pub fn to_model_messages(history: &[ChatMessage]) -> Vec<ModelMessage> {
    let mut out = Vec::with_capacity(history.len());
    for message in history {
        push_model_messages(&mut out, message);
    }
    out
}

/// Append the model form of one canonical message.
///
/// An assistant message with tool invocations becomes an assistant message
/// carrying the calls followed by one tool message per result. Invocations
/// without a result are dropped.
pub fn push_model_messages(out: &mut Vec<ModelMessage>, message: &ChatMessage) {
    match message.role {
        Role::System => out.push(ModelMessage::system(message.text())),
        Role::User => out.push(ModelMessage::user(user_content(message))),
        Role::Assistant => {
            let completed: Vec<_> = message
                .tool_invocations()
                .filter(|invocation| invocation.is_complete())
                .collect();
            let calls = completed
                .iter()
                .map(|invocation| ModelToolCall {
                    id: invocation.tool_call_id.clone(),
                    name: invocation.tool_name.clone(),
                    arguments: invocation.args.clone(),
                })
                .collect();
            out.push(ModelMessage::assistant(message.text(), calls));

            for invocation in completed {
                let content = invocation
                    .result
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                out.push(ModelMessage::tool_result(
                    &invocation.tool_call_id,
                    &invocation.tool_name,
                    content,
                ));
            }
        }
    }
}

fn user_content(message: &ChatMessage) -> String {
    let mut content = String::new();
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => content.push_str(text),
            MessagePart::Attachment {
                attachment:
                    Attachment::File {
                        name,
                        content_type,
                        url,
                    },
            } => {
                if !content.is_empty() {
                    content.push('\n');
                }
                let label = name.as_deref().unwrap_or("file");
                match content_type {
                    Some(kind) => content.push_str(&format!("[attachment {label} ({kind}): {url}]")),
                    None => content.push_str(&format!("[attachment {label}: {url}]")),
                }
            }
            MessagePart::Attachment { .. } => {}
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::chat::core::message::ToolInvocation;
    use crate::llm::model::ModelRole;

    #[test]
    fn tool_results_follow_their_assistant_message() {
        let history = vec![
            ChatMessage::user("weather?"),
            ChatMessage::new(
                Role::Assistant,
                vec![
                    MessagePart::tool_result(ToolInvocation {
                        tool_call_id: "call_1".to_string(),
                        tool_name: "getWeather".to_string(),
                        args: json!({"latitude": 1}),
                        result: Some(json!({"t": 20})),
                        is_error: false,
                    }),
                    MessagePart::tool_result(ToolInvocation {
                        tool_call_id: "call_2".to_string(),
                        tool_name: "getWeather".to_string(),
                        args: json!({}),
                        result: None,
                        is_error: false,
                    }),
                ],
            ),
            ChatMessage::assistant("It is 20 degrees."),
        ];

        let messages = to_model_messages(&history);
        let roles: Vec<ModelRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ModelRole::User,
                ModelRole::Assistant,
                ModelRole::Tool,
                ModelRole::Assistant
            ]
        );
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[2].content, "{\"t\":20}");
    }

    #[test]
    fn file_attachments_are_referenced_in_user_content() {
        let message = ChatMessage::new(
            Role::User,
            vec![
                MessagePart::text("What is this?"),
                MessagePart::Attachment {
                    attachment: Attachment::File {
                        name: Some("cat.png".to_string()),
                        content_type: Some("image/png".to_string()),
                        url: "https://example.com/cat.png".to_string(),
                    },
                },
            ],
        );
        let messages = to_model_messages(&[message]);
        assert_eq!(
            messages[0].content,
            "What is this?\n[attachment cat.png (image/png): https://example.com/cat.png]"
        );
    }
}
