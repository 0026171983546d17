//! Application database access.
//!
//! Reaching a step for the first time runs its mutation against the project's
//! live database. `PostgresLiveDatabase` does that over a fresh connection;
//! `RecordingLiveDatabase` only records what would have run.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

use crate::error::{Result, RewindError};
use crate::steps::Step;

/// Executes step mutations against a project's application database.
#[async_trait]
pub trait LiveDatabase: Send + Sync {
    /// Applies `step`'s mutation to the database at `connection_string`.
    async fn apply(&self, connection_string: &str, step: &Step) -> Result<()>;
}

/// Postgres implementation backed by sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresLiveDatabase;

impl PostgresLiveDatabase {
    /// Creates a new Postgres live database.
    pub const fn new() -> Self {
        Self
    }
}

fn live_error(action: &str, e: &sqlx::Error) -> RewindError {
    RewindError::LiveDatabase(format!("{action}: {e}"))
}

#[async_trait]
impl LiveDatabase for PostgresLiveDatabase {
    async fn apply(&self, connection_string: &str, step: &Step) -> Result<()> {
        let statements = step.mutation.statements();
        if statements.is_empty() {
            debug!(step_id = %step.id, "Step has no mutation");
            return Ok(());
        }

        let mut conn = PgConnection::connect(connection_string)
            .await
            .map_err(|e| live_error("connect error", &e))?;
        let mut tx = conn.begin().await.map_err(|e| live_error("tx begin", &e))?;
        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| live_error(&format!("step {}", step.id), &e))?;
        }
        tx.commit().await.map_err(|e| live_error("tx commit", &e))?;
        conn.close().await.map_err(|e| live_error("close", &e))?;

        info!(step_id = %step.id, statements = statements.len(), "Applied step mutation");
        Ok(())
    }
}

/// A mutation recorded by `RecordingLiveDatabase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    /// Database the mutation targeted.
    pub connection_string: String,
    /// Step that was applied.
    pub step_id: String,
    /// Statements that would have run.
    pub statements: Vec<String>,
}

/// Live database that records mutations instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingLiveDatabase {
    applied: Mutex<Vec<AppliedMutation>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingLiveDatabase {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded mutation, oldest first.
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the ids of applied steps, oldest first.
    pub fn applied_step_ids(&self) -> Vec<String> {
        self.applied().into_iter().map(|m| m.step_id).collect()
    }

    /// Makes the next `apply` fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }
}

#[async_trait]
impl LiveDatabase for RecordingLiveDatabase {
    async fn apply(&self, connection_string: &str, step: &Step) -> Result<()> {
        if let Some(message) = self.fail_next.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(RewindError::LiveDatabase(message));
        }
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).push(AppliedMutation {
            connection_string: connection_string.to_string(),
            step_id: step.id.clone(),
            statements: step.mutation.statements(),
        });
        Ok(())
    }
}
