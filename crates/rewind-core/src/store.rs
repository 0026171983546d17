//! Checkpoint graph store.
//!
//! `GraphStore` is the async face of the project and checkpoint repositories.
//! It owns the metadata `Database` behind a mutex that is only held for the
//! duration of a local query, never across a control-plane call.

use std::sync::Arc;

use rewind_abstraction::ControlPlane;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, RewindError};
use crate::models::{Checkpoint, Project};
use crate::snapshot::SettlementWaiter;
use crate::storage::{
    CheckpointRepository, Database, ProjectRepository, SqliteCheckpointRepository,
    SqliteProjectRepository, StorageError,
};

fn lookup_error(kind: &'static str, id: &str) -> impl FnOnce(StorageError) -> RewindError {
    let id = id.to_string();
    move |e| match e {
        StorageError::NotFound(_) => RewindError::not_found(kind, id),
        other => RewindError::Storage(other),
    }
}

/// Persistent checkpoint graph plus project provisioning.
#[derive(Clone)]
pub struct GraphStore {
    db: Arc<Mutex<Database>>,
    control_plane: Arc<dyn ControlPlane>,
    waiter: SettlementWaiter,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

impl GraphStore {
    /// Creates a store over `db`.
    pub fn new(db: Database, control_plane: Arc<dyn ControlPlane>, waiter: SettlementWaiter) -> Self {
        Self { db: Arc::new(Mutex::new(db)), control_plane, waiter }
    }

    /// Appends an unlinked checkpoint to a project.
    pub async fn insert(&self, project_id: &str, prompt: &str, snapshot_id: &str) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(project_id, prompt, snapshot_id);
        let mut db = self.db.lock().await;
        SqliteProjectRepository::new(&mut db)
            .get_by_id(project_id)
            .map_err(lookup_error("project", project_id))?;
        SqliteCheckpointRepository::new(&mut db).create(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Records `child_id` as the successor of `parent_id`.
    ///
    /// # Errors
    /// Returns `StorageError::Conflict` (wrapped) if the parent already has a
    /// different successor.
    pub async fn link_next(&self, parent_id: &str, child_id: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        SqliteCheckpointRepository::new(&mut db).link_next(parent_id, child_id)?;
        Ok(())
    }

    /// Inserts a checkpoint and links it after `parent_id` atomically.
    ///
    /// On `Conflict` nothing is inserted.
    pub async fn insert_linked(
        &self,
        project_id: &str,
        parent_id: &str,
        prompt: &str,
        snapshot_id: &str,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(project_id, prompt, snapshot_id);
        let mut db = self.db.lock().await;
        SqliteCheckpointRepository::new(&mut db).create_linked(&checkpoint, parent_id)?;
        Ok(checkpoint)
    }

    /// Lists a project's checkpoints in creation order.
    pub async fn list(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        let mut db = self.db.lock().await;
        Ok(SqliteCheckpointRepository::new(&mut db).get_by_project(project_id)?)
    }

    /// Looks up a checkpoint.
    pub async fn get_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        let mut db = self.db.lock().await;
        SqliteCheckpointRepository::new(&mut db).get_by_id(id).map_err(lookup_error("checkpoint", id))
    }

    /// Looks up a project.
    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let mut db = self.db.lock().await;
        SqliteProjectRepository::new(&mut db).get_by_id(id).map_err(lookup_error("project", id))
    }

    /// Replaces a checkpoint's snapshot and returns the updated record.
    pub async fn update_snapshot(&self, checkpoint_id: &str, snapshot_id: &str) -> Result<Checkpoint> {
        let mut db = self.db.lock().await;
        let mut repo = SqliteCheckpointRepository::new(&mut db);
        repo.update_snapshot(checkpoint_id, snapshot_id)
            .map_err(lookup_error("checkpoint", checkpoint_id))?;
        Ok(repo.get_by_id(checkpoint_id)?)
    }

    /// Returns the owner's active project, the most recently created one.
    pub async fn get_latest_project_for_owner(&self, owner_id: &str) -> Result<Option<Project>> {
        let mut db = self.db.lock().await;
        Ok(SqliteProjectRepository::new(&mut db).get_latest_for_owner(owner_id)?)
    }

    /// Lists every stored project.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut db = self.db.lock().await;
        Ok(SqliteProjectRepository::new(&mut db).get_all()?)
    }

    /// Deletes a project row and its checkpoints, leaving the remote project.
    pub async fn delete_project_record(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        SqliteProjectRepository::new(&mut db).delete(id).map_err(lookup_error("project", id))
    }

    /// Tears down the owner's projects and provisions a fresh one.
    ///
    /// Each existing project is deleted remotely before its row is removed,
    /// so a failed remote delete leaves local state untouched. A remote 404
    /// counts as already deleted.
    pub async fn reset_project(&self, owner_id: &str, name: &str) -> Result<Project> {
        let existing = {
            let mut db = self.db.lock().await;
            SqliteProjectRepository::new(&mut db).get_by_owner(owner_id)?
        };

        for project in existing {
            match self.control_plane.delete_project(&project.external_ref).await {
                Ok(()) => {}
                Err(e) if e.status() == Some(404) => {
                    warn!(
                        project_id = %project.id,
                        external_ref = %project.external_ref,
                        "Remote project already gone"
                    );
                }
                Err(e) => return Err(e.into()),
            }
            self.delete_project_record(&project.id).await?;
            info!(project_id = %project.id, owner_id = %owner_id, "Tore down project");
        }

        let provisioned = self.control_plane.create_project(name).await?;
        self.waiter.wait_for_all(&provisioned.project_ref, &provisioned.operation_ids).await?;

        let project =
            Project::new(provisioned.project_ref, provisioned.connection_string, owner_id);
        {
            let mut db = self.db.lock().await;
            SqliteProjectRepository::new(&mut db).create(&project)?;
        }
        info!(
            project_id = %project.id,
            external_ref = %project.external_ref,
            owner_id = %owner_id,
            "Provisioned project"
        );
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::WaitOptions;
    use rewind_abstraction::ControlPlaneError;
    use rewind_control_plane::{MockCall, MockControlPlane};

    fn store(mock: &Arc<MockControlPlane>) -> GraphStore {
        let control_plane = Arc::clone(mock) as Arc<dyn ControlPlane>;
        let waiter = SettlementWaiter::new(Arc::clone(&control_plane), WaitOptions::default());
        GraphStore::new(Database::open_in_memory().unwrap(), control_plane, waiter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_provisions_and_records() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);

        let project = store.reset_project("u1", "demo-u1").await.unwrap();

        assert!(mock.has_project(&project.external_ref));
        assert_eq!(store.get_latest_project_for_owner("u1").await.unwrap(), Some(project.clone()));
        // Provisioning operations were awaited.
        assert!(mock.count(MockCall::GetOperationStatus) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_replaces_previous_project() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let first = store.reset_project("u1", "demo-u1").await.unwrap();
        let c0 = store.insert(&first.id, "", "snap-0").await.unwrap();

        let second = store.reset_project("u1", "demo-u1").await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(!mock.has_project(&first.external_ref));
        let projects = store.list_projects().await.unwrap();
        assert_eq!(projects, vec![second]);
        assert!(matches!(
            store.get_checkpoint(&c0.id).await,
            Err(RewindError::NotFound { kind: "checkpoint", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_aborts_on_remote_delete_failure() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let first = store.reset_project("u1", "demo-u1").await.unwrap();
        let c0 = store.insert(&first.id, "", "snap-0").await.unwrap();

        mock.fail_next(
            MockCall::DeleteProject,
            ControlPlaneError::Api { status: 500, body: "unavailable".to_string() },
        );
        assert!(store.reset_project("u1", "demo-u1").await.is_err());

        assert_eq!(store.get_latest_project_for_owner("u1").await.unwrap(), Some(first));
        assert_eq!(store.get_checkpoint(&c0.id).await.unwrap(), c0);
        assert_eq!(mock.count(MockCall::CreateProject), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_tolerates_remote_already_deleted() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let first = store.reset_project("u1", "demo-u1").await.unwrap();
        mock.delete_project(&first.external_ref).await.unwrap();

        let second = store.reset_project("u1", "demo-u1").await.unwrap();
        assert_eq!(store.list_projects().await.unwrap(), vec![second]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_requires_project() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let err = store.insert("missing", "", "snap").await.unwrap_err();
        assert!(matches!(err, RewindError::NotFound { kind: "project", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_linked_conflict() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let project = store.reset_project("u1", "demo-u1").await.unwrap();
        let c0 = store.insert(&project.id, "", "snap-0").await.unwrap();
        let c1 = store.insert_linked(&project.id, &c0.id, "p1", "snap-1").await.unwrap();

        let err = store.insert_linked(&project.id, &c0.id, "p1", "snap-dup").await.unwrap_err();
        match err {
            RewindError::Storage(StorageError::Conflict { existing_next, .. }) => {
                assert_eq!(existing_next, c1.id);
            }
            other => panic!("Expected Conflict, got {other:?}"),
        }
        assert_eq!(store.list(&project.id).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_snapshot() {
        let mock = Arc::new(MockControlPlane::new());
        let store = store(&mock);
        let project = store.reset_project("u1", "demo-u1").await.unwrap();
        let c0 = store.insert(&project.id, "", "snap-0").await.unwrap();

        let updated = store.update_snapshot(&c0.id, "snap-new").await.unwrap();
        assert_eq!(updated.snapshot_id, "snap-new");
        assert!(matches!(
            store.update_snapshot("missing", "snap").await,
            Err(RewindError::NotFound { kind: "checkpoint", .. })
        ));
    }
}
