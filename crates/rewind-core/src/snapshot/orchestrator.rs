//! Snapshot creation and restore.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rewind_abstraction::{ControlPlane, OperationStatus, RestoreRequest, SnapshotRequest};
use tracing::info;

use crate::error::Result;
use crate::snapshot::waiter::SettlementWaiter;

/// Name given to the branch a restore creates.
pub fn restored_branch_name(at: DateTime<Utc>) -> String {
    format!("restored_{}", at.timestamp_millis())
}

/// Creates and restores snapshots, blocking until the control plane has
/// settled every operation the request enqueued.
#[derive(Clone)]
pub struct SnapshotOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    waiter: SettlementWaiter,
}

impl std::fmt::Debug for SnapshotOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotOrchestrator").field("waiter", &self.waiter).finish_non_exhaustive()
    }
}

impl SnapshotOrchestrator {
    /// Creates an orchestrator.
    pub fn new(control_plane: Arc<dyn ControlPlane>, waiter: SettlementWaiter) -> Self {
        Self { control_plane, waiter }
    }

    /// Returns the waiter used for settlement.
    pub const fn waiter(&self) -> &SettlementWaiter {
        &self.waiter
    }

    /// Captures a snapshot of `branch_id` and returns its id.
    ///
    /// # Errors
    /// Fails if the request fails, if the response carries no snapshot id,
    /// or if any enqueued operation does not settle.
    pub async fn create_snapshot(
        &self,
        project_ref: &str,
        branch_id: &str,
        name: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let request = SnapshotRequest {
            name: name.map(str::to_string),
            timestamp: Some(timestamp.unwrap_or_else(Utc::now)),
        };
        let created =
            self.control_plane.create_snapshot(project_ref, branch_id, &request).await?;
        self.waiter.wait_for_all(project_ref, &created.operation_ids).await?;

        info!(
            project_ref = %project_ref,
            branch_id = %branch_id,
            snapshot_id = %created.snapshot_id,
            "Snapshot created"
        );
        Ok(created.snapshot_id)
    }

    /// Restores `snapshot_id` onto `target_branch_id` and waits for the
    /// restore's operations to settle.
    ///
    /// Re-applying the same snapshot is safe.
    ///
    /// # Errors
    /// Fails if the restore request fails or any operation does not settle.
    pub async fn apply_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
        target_branch_id: &str,
    ) -> Result<BTreeMap<String, OperationStatus>> {
        let request = RestoreRequest {
            target_branch_id: target_branch_id.to_string(),
            name: restored_branch_name(Utc::now()),
            finalize: true,
        };
        let operation_ids =
            self.control_plane.restore_snapshot(project_ref, snapshot_id, &request).await?;

        if operation_ids.is_empty() {
            info!(
                project_ref = %project_ref,
                snapshot_id = %snapshot_id,
                "Restore returned no operations; treating as complete"
            );
            return Ok(BTreeMap::new());
        }

        info!(
            project_ref = %project_ref,
            snapshot_id = %snapshot_id,
            operations = operation_ids.len(),
            "Waiting for restore operations"
        );
        let settled = self.waiter.wait_for_all(project_ref, &operation_ids).await?;
        info!(project_ref = %project_ref, snapshot_id = %snapshot_id, "Snapshot applied");
        Ok(settled)
    }
}
