//! `SQLite` connection setup and schema.

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects (owner_id);
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        project_id TEXT REFERENCES projects (id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_owner_created
        ON conversations (owner_id, created_at);
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
        ON messages (conversation_id, created_at);
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
";

/// Open the database at the configured path and apply the schema.
///
/// # Errors
/// Returns an error if the database cannot be opened or migrated.
pub async fn open(config: &StorageConfig) -> ChatResult<Connection> {
    let conn = Connection::open(&config.sqlite_path).await?;
    migrate(&conn).await?;
    Ok(conn)
}

/// Open a private in-memory database with the schema applied.
///
/// # Errors
/// Returns an error if the database cannot be created.
pub async fn open_in_memory() -> ChatResult<Connection> {
    let conn = Connection::open_in_memory().await?;
    migrate(&conn).await?;
    Ok(conn)
}

async fn migrate(conn: &Connection) -> ChatResult<()> {
    conn.call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// Decode a millisecond timestamp column.
pub(crate) fn timestamp_from_millis(ts: i64) -> ChatResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts)
        .single()
        .ok_or_else(|| ChatError::Persistence("invalid timestamp".to_string()))
}
