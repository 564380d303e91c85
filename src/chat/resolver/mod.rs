//! Looks up or creates the conversation a turn belongs to.

pub mod title;

use std::sync::Arc;

use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, UserId};
use crate::chat::core::message::ChatMessage;
use crate::chat::storage::ConversationStore;
use crate::llm::ChatModel;

pub use title::{FALLBACK_TITLE, TitleGenerator, TitleSanitizer};

/// Resolves a conversation id to an owned conversation.
pub struct ConversationResolver {
    conversations: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModel>,
    titles: TitleGenerator,
}

impl ConversationResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        model: Arc<dyn ChatModel>,
        titles: TitleGenerator,
    ) -> Self {
        Self {
            conversations,
            model,
            titles,
        }
    }

    /// Return the conversation `id`, creating it for `owner_id` if absent.
    ///
    /// # Errors
    /// Returns `Unauthorized` if the conversation belongs to someone else, or a
    /// storage error.
    pub async fn resolve(
        &self,
        id: ConversationId,
        owner_id: UserId,
        first_user_message: &ChatMessage,
    ) -> ChatResult<Conversation> {
        if let Some(existing) = self.conversations.get(id).await? {
            return check_owner(existing, owner_id);
        }

        let title = self
            .titles
            .generate(self.model.as_ref(), first_user_message)
            .await;
        let created = self
            .conversations
            .create(&Conversation::new(id, owner_id, title))
            .await?;

        // A concurrent request may have won the insert; whichever row exists is authoritative.
        let stored = self
            .conversations
            .get(id)
            .await?
            .ok_or_else(|| ChatError::Persistence(format!("conversation {id} vanished after insert")))?;

        if created {
            tracing::info!(conversation_id = %id, title = %stored.title, "conversation created");
        }
        check_owner(stored, owner_id)
    }
}

fn check_owner(conversation: Conversation, owner_id: UserId) -> ChatResult<Conversation> {
    if conversation.is_owned_by(owner_id) {
        Ok(conversation)
    } else {
        tracing::warn!(conversation_id = %conversation.id, "caller does not own conversation");
        Err(ChatError::Unauthorized)
    }
}
