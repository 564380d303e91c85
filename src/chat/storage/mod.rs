//! Persistent storage for conversations, messages, projects and documents.

pub mod conversation_store;
pub mod document_store;
pub mod project_store;
pub mod schema;

pub use conversation_store::{ConversationStore, SqliteConversationStore, StoreFuture};
pub use document_store::{DocumentStore, SqliteDocumentStore};
pub use project_store::{ProjectStore, SqliteProjectStore};
pub use schema::{open, open_in_memory};
