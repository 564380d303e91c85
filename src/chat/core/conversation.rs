//! Conversation, project and document records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::{ConversationId, DocumentId, ProjectId, UserId};

/// A persisted, owned thread of messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning user; a conversation always has exactly one.
    pub owner_id: UserId,
    /// Non-empty title, set once at creation.
    pub title: String,
    /// Optional grouping.
    pub project_id: Option<ProjectId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Bumped on every message append.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Build a fresh conversation record.
    #[must_use]
    pub fn new(id: ConversationId, owner_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            title: title.into(),
            project_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `user` owns this conversation.
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == user
    }
}

/// A named grouping of conversations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Owning user.
    pub owner_id: UserId,
    /// Display name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Build a fresh project record.
    #[must_use]
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            owner_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A Markdown document drafted during a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier.
    pub id: DocumentId,
    /// Owning user.
    pub owner_id: UserId,
    /// Title the document was written about.
    pub title: String,
    /// Markdown body.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
