//! Core chat types and identifiers.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{
    AuthConfig, ChatConfig, LlmConfig, ModelSpec, ServerConfig, StorageConfig, TokenIdentity,
    TurnConfig, WeatherConfig,
};
pub use conversation::{Conversation, Document, Project};
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, DocumentId, MessageId, ProjectId, UserId};
pub use message::{Attachment, ChatMessage, MessagePart, Role, StoredMessage, ToolInvocation};
