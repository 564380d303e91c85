//! Conversation and message storage.

use std::future::Future;
use std::pin::Pin;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::{ConversationId, MessageId, ProjectId, UserId};
use crate::chat::core::message::{StoredMessage, parse_role};
use crate::chat::storage::schema::timestamp_from_millis;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Conversation store trait.
///
/// Ownership is checked by callers, never by the store.
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ChatResult<Option<Conversation>>>;

    /// Insert a conversation unless one with the same id exists.
    ///
    /// Returns `true` when a row was inserted.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, conversation: &Conversation) -> StoreFuture<'_, ChatResult<bool>>;

    /// Append messages in one transaction.
    ///
    /// Timestamps are pushed forward where needed so they strictly increase
    /// within the conversation; the stored rows are returned.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_messages(
        &self,
        conversation_id: ConversationId,
        messages: Vec<StoredMessage>,
    ) -> StoreFuture<'_, ChatResult<Vec<StoredMessage>>>;

    /// Stamp `updated_at` with the current time.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn touch(&self, conversation_id: ConversationId) -> StoreFuture<'_, ChatResult<()>>;

    /// Load all messages of a conversation in creation order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<StoredMessage>>>;

    /// List a user's conversations, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_owner(&self, owner_id: UserId) -> StoreFuture<'_, ChatResult<Vec<Conversation>>>;

    /// Delete a conversation and its messages. Returns `true` if it existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, conversation_id: ConversationId) -> StoreFuture<'_, ChatResult<bool>>;

    /// Re-point a conversation at a project, or detach it.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set_project(
        &self,
        conversation_id: ConversationId,
        project_id: Option<ProjectId>,
    ) -> StoreFuture<'_, ChatResult<()>>;
}

/// `SQLite` implementation of conversation storage.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Wrap a migrated connection.
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

type ConversationRow = (
    ConversationId,
    UserId,
    String,
    Option<ProjectId>,
    i64,
    i64,
);

const CONVERSATION_COLUMNS: &str = "id, owner_id, title, project_id, created_at, updated_at";

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn conversation_from_row(row: ConversationRow) -> ChatResult<Conversation> {
    let (id, owner_id, title, project_id, created_at, updated_at) = row;
    Ok(Conversation {
        id,
        owner_id,
        title,
        project_id,
        created_at: timestamp_from_millis(created_at)?,
        updated_at: timestamp_from_millis(updated_at)?,
    })
}

impl ConversationStore for SqliteConversationStore {
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ChatResult<Option<Conversation>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            read_conversation_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(conversation_from_row).transpose()
        })
    }

    fn create(&self, conversation: &Conversation) -> StoreFuture<'_, ChatResult<bool>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let inserted = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        "INSERT OR IGNORE INTO conversations
                         (id, owner_id, title, project_id, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            conversation.id,
                            conversation.owner_id,
                            conversation.title,
                            conversation.project_id,
                            conversation.created_at.timestamp_millis(),
                            conversation.updated_at.timestamp_millis()
                        ],
                    )?;
                    Ok(changed > 0)
                })
                .await?;
            Ok(inserted)
        })
    }

    fn append_messages(
        &self,
        conversation_id: ConversationId,
        messages: Vec<StoredMessage>,
    ) -> StoreFuture<'_, ChatResult<Vec<StoredMessage>>> {
        Box::pin(async move {
            if messages.is_empty() {
                return Ok(Vec::new());
            }

            let stamped = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let mut last: i64 = tx.query_row(
                        "SELECT COALESCE(MAX(created_at), 0) FROM messages WHERE conversation_id = ?1",
                        rusqlite::params![conversation_id],
                        |row| row.get(0),
                    )?;

                    let mut stamped = Vec::with_capacity(messages.len());
                    {
                        let mut stmt = tx.prepare(
                            "INSERT INTO messages (id, conversation_id, role, content, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                        )?;

                        for message in messages {
                            let ts = message.created_at.timestamp_millis().max(last + 1);
                            last = ts;
                            stmt.execute(rusqlite::params![
                                message.id,
                                conversation_id,
                                message.role.as_str(),
                                message.content,
                                ts
                            ])?;
                            stamped.push((message, ts));
                        }
                    }

                    tx.commit()?;
                    Ok(stamped)
                })
                .await?;

            stamped
                .into_iter()
                .map(|(message, ts)| {
                    Ok(StoredMessage {
                        conversation_id,
                        created_at: timestamp_from_millis(ts)?,
                        ..message
                    })
                })
                .collect()
        })
    }

    fn touch(&self, conversation_id: ConversationId) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let now = chrono::Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE conversations SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                        rusqlite::params![conversation_id, now],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<StoredMessage>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, role, content, created_at
                         FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at, rowid",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], |row| {
                            let id: MessageId = row.get(0)?;
                            let role: String = row.get(1)?;
                            let content: String = row.get(2)?;
                            let ts: i64 = row.get(3)?;
                            Ok((id, role, content, ts))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut messages = Vec::with_capacity(rows.len());
            for (id, role, content, ts) in rows {
                messages.push(StoredMessage {
                    id,
                    conversation_id,
                    role: parse_role(&role)?,
                    content,
                    created_at: timestamp_from_millis(ts)?,
                });
            }
            Ok(messages)
        })
    }

    fn list_for_owner(&self, owner_id: UserId) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations
                         WHERE owner_id = ?1
                         ORDER BY created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![owner_id], read_conversation_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(conversation_from_row).collect()
        })
    }

    fn delete(&self, conversation_id: ConversationId) -> StoreFuture<'_, ChatResult<bool>> {
        Box::pin(async move {
            let deleted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "DELETE FROM messages WHERE conversation_id = ?1",
                        rusqlite::params![conversation_id],
                    )?;
                    let changed = tx.execute(
                        "DELETE FROM conversations WHERE id = ?1",
                        rusqlite::params![conversation_id],
                    )?;
                    tx.commit()?;
                    Ok(changed > 0)
                })
                .await?;
            Ok(deleted)
        })
    }

    fn set_project(
        &self,
        conversation_id: ConversationId,
        project_id: Option<ProjectId>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE conversations SET project_id = ?2 WHERE id = ?1",
                        rusqlite::params![conversation_id, project_id],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}
