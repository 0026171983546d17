//! Database connection and schema management.

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::storage::error::{StorageError, StorageResult};

/// Database connection wrapper.
///
/// Manages the SQLite connection and schema initialization for project and
/// checkpoint metadata.
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.conn.path()).finish()
    }
}

impl Database {
    /// Opens a new database connection at the specified path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database connection fails
    pub fn open(path: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database for testing.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database connection fails
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Gets a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Gets a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    ///
    /// # Errors
    /// Returns the closure's error, or `StorageError::Connection` if the
    /// transaction cannot be started or committed.
    pub fn transaction<T, F>(&mut self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StorageResult<T>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    /// Initializes the database schema.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If schema creation fails
    fn init_schema(&self) -> StorageResult<()> {
        info!("Initializing database schema");

        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                external_ref TEXT NOT NULL UNIQUE,
                connection_string TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // next_checkpoint_id is UNIQUE: a checkpoint has at most one predecessor
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                snapshot_id TEXT NOT NULL,
                next_checkpoint_id TEXT UNIQUE,
                created_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_projects_owner_id ON projects(owner_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_project_id ON checkpoints(project_id)",
            [],
        )?;

        info!("Database schema initialized successfully");
        Ok(())
    }
}
