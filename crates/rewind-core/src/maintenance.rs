//! Bulk cleanup of control-plane resources.
//!
//! Every operation attempts each item independently: per-item failures are
//! logged and collected in the `CleanupReport` rather than aborting the run.

use std::sync::Arc;

use rewind_abstraction::{ControlPlane, ControlPlaneError};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::GraphStore;

/// An item that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Identifier of the item.
    pub id: String,
    /// Error message.
    pub error: String,
}

/// Outcome of a cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Items a deletion was attempted for.
    pub attempted: usize,
    /// Items deleted.
    pub deleted: Vec<String>,
    /// Items that failed.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    fn record(&mut self, id: &str, result: std::result::Result<(), ControlPlaneError>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.deleted.push(id.to_string()),
            Err(e) => {
                warn!(id = %id, error = %e, "Cleanup item failed");
                self.failures.push(CleanupFailure { id: id.to_string(), error: e.to_string() });
            }
        }
    }

    /// Returns `true` if every attempted item was deleted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes snapshots, branches and projects in bulk.
#[derive(Clone)]
pub struct Maintenance {
    control_plane: Arc<dyn ControlPlane>,
    store: GraphStore,
}

impl std::fmt::Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintenance").finish_non_exhaustive()
    }
}

impl Maintenance {
    /// Creates a maintenance runner.
    pub fn new(control_plane: Arc<dyn ControlPlane>, store: GraphStore) -> Self {
        Self { control_plane, store }
    }

    /// Deletes every snapshot of a project.
    ///
    /// # Errors
    /// Fails only if the snapshots cannot be listed.
    pub async fn purge_snapshots(&self, project_ref: &str) -> Result<CleanupReport> {
        let snapshots = self.control_plane.list_snapshots(project_ref).await?;
        info!(project_ref = %project_ref, count = snapshots.len(), "Deleting snapshots");

        let mut report = CleanupReport::default();
        for snapshot in snapshots {
            let result = self.control_plane.delete_snapshot(project_ref, &snapshot.id).await;
            report.record(&snapshot.id, result);
        }
        Ok(report)
    }

    /// Deletes every branch of a project not named `keep`.
    ///
    /// # Errors
    /// Fails only if the branches cannot be listed.
    pub async fn prune_branches(&self, project_ref: &str, keep: &str) -> Result<CleanupReport> {
        let branches = self.control_plane.list_branches(project_ref).await?;
        let doomed: Vec<_> = branches.into_iter().filter(|b| !b.has_name(keep)).collect();
        info!(project_ref = %project_ref, keep = %keep, count = doomed.len(), "Deleting branches");

        let mut report = CleanupReport::default();
        for branch in doomed {
            let result = self.control_plane.delete_branch(project_ref, &branch.id).await;
            report.record(&branch.id, result);
        }
        Ok(report)
    }

    /// Deletes every stored project remotely, then removes all project rows.
    ///
    /// # Errors
    /// Fails if the stored projects cannot be read or a row cannot be
    /// deleted.
    pub async fn cleanup_all(&self) -> Result<CleanupReport> {
        let projects = self.store.list_projects().await?;
        info!(count = projects.len(), "Deleting projects");

        let mut report = CleanupReport::default();
        for project in &projects {
            let result = self.control_plane.delete_project(&project.external_ref).await;
            report.record(&project.external_ref, result);
        }
        for project in &projects {
            self.store.delete_project_record(&project.id).await?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{SettlementWaiter, WaitOptions};
    use crate::storage::Database;
    use rewind_abstraction::SnapshotRequest;
    use rewind_control_plane::{MockCall, MockControlPlane};

    fn maintenance(mock: &Arc<MockControlPlane>) -> Maintenance {
        let control_plane = Arc::clone(mock) as Arc<dyn ControlPlane>;
        let waiter = SettlementWaiter::new(Arc::clone(&control_plane), WaitOptions::default());
        let store = GraphStore::new(Database::open_in_memory().unwrap(), Arc::clone(&control_plane), waiter);
        Maintenance::new(control_plane, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_all_removes_rows_despite_remote_failures() {
        let mock = Arc::new(MockControlPlane::new());
        let maintenance = maintenance(&mock);
        let store = &maintenance.store;
        let first = store.reset_project("u1", "demo-u1").await.unwrap();
        let second = store.reset_project("u2", "demo-u2").await.unwrap();
        let c0 = store.insert(&first.id, "", "snap-0").await.unwrap();
        let c1 = store.insert_linked(&first.id, &c0.id, "p1", "snap-1").await.unwrap();
        let d0 = store.insert(&second.id, "", "snap-2").await.unwrap();

        mock.fail_next(
            MockCall::DeleteProject,
            ControlPlaneError::Api { status: 500, body: "unavailable".to_string() },
        );
        let report = maintenance.cleanup_all().await.unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(mock.count(MockCall::DeleteProject), 2);
        // One remote project survives the failed delete.
        assert_eq!(mock.project_refs().len(), 1);

        assert!(store.list_projects().await.unwrap().is_empty());
        for id in [&c0.id, &c1.id, &d0.id] {
            assert!(matches!(
                store.get_checkpoint(id).await,
                Err(crate::error::RewindError::NotFound { kind: "checkpoint", .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_cleanup_all_without_projects() {
        let mock = Arc::new(MockControlPlane::new());
        let report = maintenance(&mock).cleanup_all().await.unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(mock.count(MockCall::DeleteProject), 0);
    }

    #[tokio::test]
    async fn test_purge_snapshots_collects_failures() {
        let mock = Arc::new(MockControlPlane::new());
        mock.insert_project("p", &["main"]);
        let branch = mock.branches("p").remove(0);
        for _ in 0..3 {
            mock.create_snapshot("p", &branch.id, &SnapshotRequest::default()).await.unwrap();
        }
        mock.fail_next(
            MockCall::DeleteSnapshot,
            ControlPlaneError::Api { status: 423, body: "locked".to_string() },
        );

        let report = maintenance(&mock).purge_snapshots("p").await.unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(mock.snapshot_ids("p").len(), 1);
    }

    #[tokio::test]
    async fn test_prune_branches_keeps_named_branch() {
        let mock = Arc::new(MockControlPlane::new());
        mock.insert_project("p", &["production", "restored_1", "restored_2"]);

        let report = maintenance(&mock).prune_branches("p", "production").await.unwrap();

        assert_eq!(report.deleted.len(), 2);
        assert!(report.is_clean());
        let remaining = mock.branches("p");
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].has_name("production"));
    }

    #[tokio::test]
    async fn test_purge_snapshots_list_failure_is_fatal() {
        let mock = Arc::new(MockControlPlane::new());
        assert!(maintenance(&mock).purge_snapshots("missing").await.is_err());
    }
}
