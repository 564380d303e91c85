//! Writes turn messages to storage.

use std::sync::Arc;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::{Attachment, ChatMessage, MessagePart, StoredMessage};
use crate::chat::storage::ConversationStore;

/// Persists the user message before a turn and the assistant output after it.
#[derive(Clone)]
pub struct PersistenceCommitter {
    conversations: Arc<dyn ConversationStore>,
}

impl PersistenceCommitter {
    /// Create a committer over a conversation store.
    #[must_use]
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    /// Store the turn's user message.
    ///
    /// # Errors
    /// Returns an error if the message cannot be stored; the turn must not start.
    pub async fn commit_user_message(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> ChatResult<StoredMessage> {
        let stored = StoredMessage::from_chat(conversation_id, message)?;
        let mut rows = self
            .conversations
            .append_messages(conversation_id, vec![stored])
            .await?;
        self.conversations.touch(conversation_id).await?;

        rows.pop()
            .ok_or_else(|| ChatError::Persistence("append returned no rows".to_string()))
    }

    /// Sanitize and store the assistant output of a turn in one batch.
    ///
    /// Failures are logged, not returned: the response has already been
    /// streamed. Returns the number of messages stored.
    pub async fn commit_assistant_messages(
        &self,
        conversation_id: ConversationId,
        messages: Vec<ChatMessage>,
    ) -> usize {
        match self.try_commit(conversation_id, messages).await {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "failed to persist assistant messages"
                );
                0
            }
        }
    }

    async fn try_commit(
        &self,
        conversation_id: ConversationId,
        messages: Vec<ChatMessage>,
    ) -> ChatResult<usize> {
        let sanitized = sanitize_response_messages(messages);
        if sanitized.is_empty() {
            tracing::debug!(conversation_id = %conversation_id, "no assistant output to persist");
            return Ok(0);
        }

        let rows = sanitized
            .iter()
            .map(|message| StoredMessage::from_chat(conversation_id, message))
            .collect::<ChatResult<Vec<_>>>()?;
        let stored = self
            .conversations
            .append_messages(conversation_id, rows)
            .await?;
        self.conversations.touch(conversation_id).await?;

        tracing::debug!(conversation_id = %conversation_id, count = stored.len(), "assistant messages persisted");
        Ok(stored.len())
    }
}

/// Drop empty text parts, tool invocations that never received a result, and
/// messages left with no parts.
#[must_use]
pub fn sanitize_response_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .filter_map(|mut message| {
            message.parts.retain(|part| match part {
                MessagePart::Text { text } => !text.trim().is_empty(),
                MessagePart::Attachment {
                    attachment: Attachment::ToolResult(invocation),
                } => invocation.is_complete(),
                MessagePart::Attachment { .. } => true,
            });
            (!message.parts.is_empty()).then_some(message)
        })
        .collect()
}
