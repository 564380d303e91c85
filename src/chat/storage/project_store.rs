//! Project (conversation grouping) storage.

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::conversation::Project;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::{ProjectId, UserId};
use crate::chat::storage::conversation_store::StoreFuture;
use crate::chat::storage::schema::timestamp_from_millis;

/// Project store trait.
pub trait ProjectStore: Send + Sync {
    /// Insert a project.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, project: &Project) -> StoreFuture<'_, ChatResult<()>>;

    /// Fetch a project by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ProjectId) -> StoreFuture<'_, ChatResult<Option<Project>>>;

    /// List a user's projects, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_owner(&self, owner_id: UserId) -> StoreFuture<'_, ChatResult<Vec<Project>>>;

    /// Delete a project, detaching its conversations. Returns `true` if it existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: ProjectId) -> StoreFuture<'_, ChatResult<bool>>;
}

/// `SQLite` implementation of project storage.
#[derive(Clone)]
pub struct SqliteProjectStore {
    conn: Connection,
}

impl SqliteProjectStore {
    /// Wrap a migrated connection.
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

type ProjectRow = (ProjectId, UserId, String, i64);

fn project_from_row(row: ProjectRow) -> ChatResult<Project> {
    let (id, owner_id, name, ts) = row;
    Ok(Project {
        id,
        owner_id,
        name,
        created_at: timestamp_from_millis(ts)?,
    })
}

impl ProjectStore for SqliteProjectStore {
    fn create(&self, project: &Project) -> StoreFuture<'_, ChatResult<()>> {
        let project = project.clone();
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO projects (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            project.id,
                            project.owner_id,
                            project.name,
                            project.created_at.timestamp_millis()
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get(&self, id: ProjectId) -> StoreFuture<'_, ChatResult<Option<Project>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row: Option<ProjectRow> = conn
                        .query_row(
                            "SELECT id, owner_id, name, created_at FROM projects WHERE id = ?1",
                            rusqlite::params![id],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(project_from_row).transpose()
        })
    }

    fn list_for_owner(&self, owner_id: UserId) -> StoreFuture<'_, ChatResult<Vec<Project>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, owner_id, name, created_at FROM projects
                         WHERE owner_id = ?1
                         ORDER BY created_at",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![owner_id], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        })?
                        .collect::<Result<Vec<ProjectRow>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(project_from_row).collect()
        })
    }

    fn delete(&self, id: ProjectId) -> StoreFuture<'_, ChatResult<bool>> {
        Box::pin(async move {
            let deleted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "UPDATE conversations SET project_id = NULL WHERE project_id = ?1",
                        rusqlite::params![id],
                    )?;
                    let changed =
                        tx.execute("DELETE FROM projects WHERE id = ?1", rusqlite::params![id])?;
                    tx.commit()?;
                    Ok(changed > 0)
                })
                .await?;
            Ok(deleted)
        })
    }
}
