//! Project and checkpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provisioned control-plane project owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Local identifier.
    pub id: String,
    /// Control-plane project id.
    pub external_ref: String,
    /// Connection string of the project's application database.
    pub connection_string: String,
    /// Owner of the project.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creates a new project record with a fresh id.
    pub fn new(
        external_ref: impl Into<String>,
        connection_string: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            external_ref: external_ref.into(),
            connection_string: connection_string.into(),
            owner_id: owner_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A point in a project's history, pairing a prompt with a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Local identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Prompt that produced this state. Empty for the bootstrap checkpoint.
    pub prompt: String,
    /// Control-plane snapshot holding this state.
    pub snapshot_id: String,
    /// Immediate successor, once one has been created.
    pub next_checkpoint_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates an unlinked checkpoint with a fresh id.
    pub fn new(
        project_id: impl Into<String>,
        prompt: impl Into<String>,
        snapshot_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            prompt: prompt.into(),
            snapshot_id: snapshot_id.into(),
            next_checkpoint_id: None,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if a successor has been recorded.
    pub fn has_next(&self) -> bool {
        self.next_checkpoint_id.is_some()
    }
}
