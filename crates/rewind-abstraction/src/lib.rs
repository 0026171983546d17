//! Control-plane abstraction layer for Rewind.
//!
//! This crate defines the trait and wire-neutral types used to talk to a
//! database control plane: provisioning projects, listing branches, creating
//! and restoring snapshots, and observing the asynchronous operations those
//! requests enqueue.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when talking to the control plane.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPlaneError {
    /// Required credentials or identifiers are missing.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// The request could not be sent or no response was received.
    #[error("Request Error: {0}")]
    Request(String),

    /// The control plane answered with a non-2xx status.
    #[error("API Error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The response was well-formed JSON but violated the expected contract
    /// (for example a missing snapshot id or operation status).
    #[error("Protocol Error: {0}")]
    Protocol(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl ControlPlaneError {
    /// Returns the HTTP status for API errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Status of an asynchronous control-plane operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Queued, not yet started.
    Scheduling,
    /// In progress.
    Running,
    /// Completed successfully.
    Finished,
    /// Completed with an error. The control plane may still retry it.
    Failed,
    /// Cancellation requested.
    Cancelling,
    /// Cancelled.
    Cancelled,
    /// Skipped because it became unnecessary.
    Skipped,
}

impl OperationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Scheduling,
        Self::Running,
        Self::Finished,
        Self::Failed,
        Self::Cancelling,
        Self::Cancelled,
        Self::Skipped,
    ];

    /// Returns `true` for statuses that will not change any more.
    ///
    /// `Failed` is not in this set: the control plane retries failed
    /// operations on its own, so a waiter keeps polling.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Skipped | Self::Cancelled)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ControlPlaneError::Protocol(format!("Unknown operation status: {s}")))
    }
}

/// A live branch of a control-plane project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch identifier.
    pub id: String,
    /// Branch name ("main", "production", ...).
    pub name: Option<String>,
    /// Creation time, when reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Parent branch id, when reported.
    pub parent_id: Option<String>,
}

impl Branch {
    /// Creates a branch with only an id and a name.
    #[must_use]
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: Some(name.into()), created_at: None, parent_id: None }
    }

    /// Returns `true` if the branch carries the given name.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// A freshly provisioned project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedProject {
    /// Control-plane project identifier.
    pub project_ref: String,
    /// Connection string of the project's default database.
    pub connection_string: String,
    /// Provisioning operations that must settle before the project is usable.
    pub operation_ids: Vec<String>,
}

/// Result of a snapshot creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCreated {
    /// Identifier of the new snapshot.
    pub snapshot_id: String,
    /// Operations enqueued by the request.
    pub operation_ids: Vec<String>,
}

/// Summary of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Snapshot identifier.
    pub id: String,
    /// Snapshot name, when set.
    pub name: Option<String>,
    /// Creation time, when reported.
    pub created_at: Option<DateTime<Utc>>,
}

/// Parameters for a snapshot creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Optional snapshot name.
    pub name: Option<String>,
    /// Point in time to capture. The control plane uses "now" when unset.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parameters for a snapshot restore request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Branch that receives the snapshot contents.
    pub target_branch_id: String,
    /// Name given to the branch created by the restore.
    pub name: String,
    /// Move the live compute onto the restored branch so connections survive.
    pub finalize: bool,
}

/// Core trait for a database control plane.
///
/// Every call is a single request; implementations never retry.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Provisions a new project.
    async fn create_project(&self, name: &str) -> Result<ProvisionedProject, ControlPlaneError>;

    /// Deletes a project and everything it owns.
    async fn delete_project(&self, project_ref: &str) -> Result<(), ControlPlaneError>;

    /// Lists the branches of a project.
    async fn list_branches(&self, project_ref: &str) -> Result<Vec<Branch>, ControlPlaneError>;

    /// Deletes a branch.
    async fn delete_branch(
        &self,
        project_ref: &str,
        branch_id: &str,
    ) -> Result<(), ControlPlaneError>;

    /// Captures a snapshot of a branch.
    async fn create_snapshot(
        &self,
        project_ref: &str,
        branch_id: &str,
        request: &SnapshotRequest,
    ) -> Result<SnapshotCreated, ControlPlaneError>;

    /// Lists the snapshots of a project.
    async fn list_snapshots(
        &self,
        project_ref: &str,
    ) -> Result<Vec<SnapshotSummary>, ControlPlaneError>;

    /// Deletes a snapshot.
    async fn delete_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
    ) -> Result<(), ControlPlaneError>;

    /// Restores a snapshot onto a branch and returns the ids of the
    /// operations the restore enqueued.
    async fn restore_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
        request: &RestoreRequest,
    ) -> Result<Vec<String>, ControlPlaneError>;

    /// Fetches the current status of an operation.
    async fn get_operation_status(
        &self,
        project_ref: &str,
        operation_id: &str,
    ) -> Result<OperationStatus, ControlPlaneError>;
}
