//! Storage for documents drafted by the `createDocument` tool.

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::conversation::Document;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::{DocumentId, UserId};
use crate::chat::storage::conversation_store::StoreFuture;
use crate::chat::storage::schema::timestamp_from_millis;

/// Document store trait.
pub trait DocumentStore: Send + Sync {
    /// Save a document, replacing any previous version with the same id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn save(&self, document: &Document) -> StoreFuture<'_, ChatResult<()>>;

    /// Fetch a document by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: DocumentId) -> StoreFuture<'_, ChatResult<Option<Document>>>;
}

/// `SQLite` implementation of document storage.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    /// Wrap a migrated connection.
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn save(&self, document: &Document) -> StoreFuture<'_, ChatResult<()>> {
        let document = document.clone();
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO documents (id, owner_id, title, content, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![
                            document.id,
                            document.owner_id,
                            document.title,
                            document.content,
                            document.created_at.timestamp_millis()
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get(&self, id: DocumentId) -> StoreFuture<'_, ChatResult<Option<Document>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT owner_id, title, content, created_at FROM documents WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                let owner_id: UserId = row.get(0)?;
                                let title: String = row.get(1)?;
                                let content: String = row.get(2)?;
                                let ts: i64 = row.get(3)?;
                                Ok((owner_id, title, content, ts))
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            match row {
                Some((owner_id, title, content, ts)) => Ok(Some(Document {
                    id,
                    owner_id,
                    title,
                    content,
                    created_at: timestamp_from_millis(ts)?,
                })),
                None => Ok(None),
            }
        })
    }
}
