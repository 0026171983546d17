//! Repository implementations for data persistence.
//!
//! This module provides the Repository pattern implementation for projects
//! and checkpoints using SQLite as the backing store.

use crate::models::{Checkpoint, Project};
use crate::storage::database::Database;
use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::{debug, info};

// ============================================================================
// Row Parsing Helpers
// ============================================================================

/// Parses an RFC3339 timestamp string from a row into a `DateTime<Utc>`.
///
/// # Errors
/// Returns a `rusqlite::Error::InvalidColumnType` if parsing fails.
fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str).map(|dt| dt.with_timezone(&Utc)).map_err(|_| {
        rusqlite::Error::InvalidColumnType(
            idx,
            column_name.to_string(),
            rusqlite::types::Type::Text,
        )
    })
}

/// Formats a timestamp so that string order matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        external_ref: row.get(1)?,
        connection_string: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: parse_timestamp(row, 4, "created_at")?,
    })
}

fn checkpoint_from_row(row: &Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get(0)?,
        project_id: row.get(1)?,
        prompt: row.get(2)?,
        snapshot_id: row.get(3)?,
        next_checkpoint_id: row.get(4)?,
        created_at: parse_timestamp(row, 5, "created_at")?,
    })
}

fn not_found_error(table: &str, id: &str) -> StorageError {
    StorageError::NotFound(format!("{} with id {} not found", table, id))
}

const PROJECT_COLUMNS: &str = "id, external_ref, connection_string, owner_id, created_at";
const CHECKPOINT_COLUMNS: &str =
    "id, project_id, prompt, snapshot_id, next_checkpoint_id, created_at";

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository trait for project operations.
pub trait ProjectRepository {
    /// Creates a new project in storage.
    fn create(&mut self, project: &Project) -> StorageResult<()>;

    /// Retrieves a project by ID.
    fn get_by_id(&self, id: &str) -> StorageResult<Project>;

    /// Retrieves the most recently created project of an owner.
    fn get_latest_for_owner(&self, owner_id: &str) -> StorageResult<Option<Project>>;

    /// Retrieves all projects of an owner, oldest first.
    fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<Project>>;

    /// Retrieves all projects, oldest first.
    fn get_all(&self) -> StorageResult<Vec<Project>>;

    /// Deletes a project and, by cascade, its checkpoints.
    fn delete(&mut self, id: &str) -> StorageResult<()>;
}

/// Repository trait for checkpoint operations.
pub trait CheckpointRepository {
    /// Creates a new checkpoint in storage.
    fn create(&mut self, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Retrieves a checkpoint by ID.
    fn get_by_id(&self, id: &str) -> StorageResult<Checkpoint>;

    /// Retrieves the checkpoints of a project in creation order.
    fn get_by_project(&self, project_id: &str) -> StorageResult<Vec<Checkpoint>>;

    /// Records `child_id` as the successor of `parent_id`, only if the parent
    /// has none yet.
    fn link_next(&mut self, parent_id: &str, child_id: &str) -> StorageResult<()>;

    /// Inserts `checkpoint` and links it as the successor of `parent_id` in a
    /// single transaction.
    fn create_linked(&mut self, checkpoint: &Checkpoint, parent_id: &str) -> StorageResult<()>;

    /// Replaces the snapshot id of a checkpoint.
    fn update_snapshot(&mut self, id: &str, snapshot_id: &str) -> StorageResult<()>;
}

// ============================================================================
// SQLite Project Repository
// ============================================================================

/// SQLite implementation of ProjectRepository.
pub struct SqliteProjectRepository<'a> {
    db: &'a mut Database,
}

impl<'a> SqliteProjectRepository<'a> {
    /// Creates a new SQLite project repository.
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    fn query(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> StorageResult<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects {clause}");
        let mut stmt = self.db.conn().prepare(&sql)?;
        let projects = stmt
            .query_map(args, project_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }
}

impl ProjectRepository for SqliteProjectRepository<'_> {
    fn create(&mut self, project: &Project) -> StorageResult<()> {
        if project.external_ref.trim().is_empty() {
            return Err(StorageError::InvalidData("Project external_ref cannot be empty".to_string()));
        }
        self.db.conn_mut().execute(
            "INSERT INTO projects (id, external_ref, connection_string, owner_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project.id,
                project.external_ref,
                project.connection_string,
                project.owner_id,
                format_timestamp(&project.created_at)
            ],
        )?;
        info!(project_id = %project.id, owner_id = %project.owner_id, "Created project");
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> StorageResult<Project> {
        self.query("WHERE id = ?1", params![id])?
            .into_iter()
            .next()
            .ok_or_else(|| not_found_error("projects", id))
    }

    fn get_latest_for_owner(&self, owner_id: &str) -> StorageResult<Option<Project>> {
        Ok(self
            .query("WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1", params![owner_id])?
            .into_iter()
            .next())
    }

    fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<Project>> {
        self.query("WHERE owner_id = ?1 ORDER BY created_at ASC, rowid ASC", params![owner_id])
    }

    fn get_all(&self) -> StorageResult<Vec<Project>> {
        self.query("ORDER BY created_at ASC, rowid ASC", params![])
    }

    fn delete(&mut self, id: &str) -> StorageResult<()> {
        let rows_affected =
            self.db.conn_mut().execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if rows_affected == 0 {
            return Err(not_found_error("projects", id));
        }
        info!(project_id = %id, "Deleted project");
        Ok(())
    }
}

// ============================================================================
// SQLite Checkpoint Repository
// ============================================================================

/// SQLite implementation of CheckpointRepository.
pub struct SqliteCheckpointRepository<'a> {
    db: &'a mut Database,
}

impl<'a> SqliteCheckpointRepository<'a> {
    /// Creates a new SQLite checkpoint repository.
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }
}

fn insert_checkpoint(conn: &Connection, checkpoint: &Checkpoint) -> StorageResult<()> {
    if checkpoint.snapshot_id.trim().is_empty() {
        return Err(StorageError::InvalidData("Checkpoint snapshot_id cannot be empty".to_string()));
    }
    conn.execute(
        "INSERT INTO checkpoints (id, project_id, prompt, snapshot_id, next_checkpoint_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            checkpoint.id,
            checkpoint.project_id,
            checkpoint.prompt,
            checkpoint.snapshot_id,
            checkpoint.next_checkpoint_id,
            format_timestamp(&checkpoint.created_at)
        ],
    )?;
    Ok(())
}

fn load_checkpoint(conn: &Connection, id: &str) -> StorageResult<Checkpoint> {
    let sql = format!("SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE id = ?1");
    conn.query_row(&sql, params![id], checkpoint_from_row)
        .optional()?
        .ok_or_else(|| not_found_error("checkpoints", id))
}

/// Conditional link shared by `link_next` and `create_linked`.
fn link_in(conn: &Connection, parent_id: &str, child_id: &str) -> StorageResult<()> {
    if parent_id == child_id {
        return Err(StorageError::InvalidData(format!(
            "Checkpoint {parent_id} cannot be its own successor"
        )));
    }

    let parent = load_checkpoint(conn, parent_id)?;
    let child = load_checkpoint(conn, child_id)?;
    if parent.project_id != child.project_id {
        return Err(StorageError::InvalidData(format!(
            "Checkpoints {parent_id} and {child_id} belong to different projects"
        )));
    }
    if let Some(existing_next) = parent.next_checkpoint_id {
        if existing_next == child_id {
            return Ok(());
        }
        return Err(StorageError::Conflict { parent_id: parent_id.to_string(), existing_next });
    }

    // Walk forward from the child; reaching the parent means a cycle.
    let mut cursor = child.next_checkpoint_id;
    while let Some(id) = cursor {
        if id == parent_id {
            return Err(StorageError::InvalidData(format!(
                "Linking {parent_id} -> {child_id} would create a cycle"
            )));
        }
        cursor = load_checkpoint(conn, &id)?.next_checkpoint_id;
    }

    let updated = conn
        .execute(
            "UPDATE checkpoints SET next_checkpoint_id = ?2 WHERE id = ?1 AND next_checkpoint_id IS NULL",
            params![parent_id, child_id],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                StorageError::InvalidData(format!(
                    "Checkpoint {child_id} already has a predecessor"
                ))
            }
            other => StorageError::Connection(other),
        })?;

    if updated == 0 {
        let existing_next = load_checkpoint(conn, parent_id)?.next_checkpoint_id.unwrap_or_default();
        return Err(StorageError::Conflict { parent_id: parent_id.to_string(), existing_next });
    }
    Ok(())
}

impl CheckpointRepository for SqliteCheckpointRepository<'_> {
    fn create(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        insert_checkpoint(self.db.conn(), checkpoint)?;
        info!(
            checkpoint_id = %checkpoint.id,
            project_id = %checkpoint.project_id,
            "Created checkpoint"
        );
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> StorageResult<Checkpoint> {
        load_checkpoint(self.db.conn(), id)
    }

    fn get_by_project(&self, project_id: &str) -> StorageResult<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE project_id = ?1 ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let checkpoints = stmt
            .query_map(params![project_id], checkpoint_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(checkpoints)
    }

    fn link_next(&mut self, parent_id: &str, child_id: &str) -> StorageResult<()> {
        self.db.transaction(|tx| link_in(tx, parent_id, child_id))?;
        debug!(parent_id = %parent_id, child_id = %child_id, "Linked checkpoints");
        Ok(())
    }

    fn create_linked(&mut self, checkpoint: &Checkpoint, parent_id: &str) -> StorageResult<()> {
        self.db.transaction(|tx| {
            insert_checkpoint(tx, checkpoint)?;
            link_in(tx, parent_id, &checkpoint.id)
        })?;
        info!(
            checkpoint_id = %checkpoint.id,
            parent_id = %parent_id,
            project_id = %checkpoint.project_id,
            "Created linked checkpoint"
        );
        Ok(())
    }

    fn update_snapshot(&mut self, id: &str, snapshot_id: &str) -> StorageResult<()> {
        let rows_affected = self.db.conn_mut().execute(
            "UPDATE checkpoints SET snapshot_id = ?2 WHERE id = ?1",
            params![id, snapshot_id],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("checkpoints", id));
        }
        debug!(checkpoint_id = %id, snapshot_id = %snapshot_id, "Updated checkpoint snapshot");
        Ok(())
    }
}
