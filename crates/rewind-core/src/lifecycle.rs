//! Checkpoint lifecycle.
//!
//! `CheckpointController` moves an owner's project through its history. The
//! caller holds the current position: every transition takes the checkpoint
//! ids it needs and returns the checkpoint the caller is now positioned on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rewind_abstraction::ControlPlane;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::config::{Config, ProjectConfig};
use crate::error::{Result, RewindError};
use crate::live::LiveDatabase;
use crate::models::{Checkpoint, Project};
use crate::snapshot::{
    BranchResolver, SettlementWaiter, SnapshotOrchestrator, UpdateObserver, WaitOptions,
};
use crate::steps::{DemoScript, Step};
use crate::storage::{Database, StorageError};
use crate::store::GraphStore;

/// Serializes transitions per owner. An owner has one active project, so
/// this is also per project.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock for `key`. Released on drop.
    ///
    /// Entries nobody holds or waits on are evicted here, so the table only
    /// tracks keys in use.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A project's history as seen from one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    /// The owner's active project.
    pub project: Project,
    /// All checkpoints in creation order.
    pub checkpoints: Vec<Checkpoint>,
    /// Position of the current checkpoint in `checkpoints`.
    pub current_index: usize,
    /// Checkpoint one step back, if any.
    pub previous: Option<Checkpoint>,
    /// Script step that follows the current checkpoint, if any.
    pub next_step: Option<Step>,
    /// Whether the current checkpoint already has a successor.
    pub has_next_checkpoint: bool,
}

impl Timeline {
    /// The current checkpoint.
    pub fn current(&self) -> Option<&Checkpoint> {
        self.checkpoints.get(self.current_index)
    }
}

/// Drives checkpoint transitions for owners' projects.
pub struct CheckpointController {
    store: GraphStore,
    orchestrator: SnapshotOrchestrator,
    resolver: BranchResolver,
    live: Arc<dyn LiveDatabase>,
    script: DemoScript,
    project: ProjectConfig,
    locks: ProjectLocks,
}

impl std::fmt::Debug for CheckpointController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointController")
            .field("resolver", &self.resolver)
            .field("script_steps", &self.script.len())
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl CheckpointController {
    /// Creates a controller from its parts.
    pub fn new(
        store: GraphStore,
        orchestrator: SnapshotOrchestrator,
        resolver: BranchResolver,
        live: Arc<dyn LiveDatabase>,
        script: DemoScript,
        project: ProjectConfig,
    ) -> Self {
        Self { store, orchestrator, resolver, live, script, project, locks: ProjectLocks::new() }
    }

    /// Wires a controller from configuration.
    pub fn from_config(
        config: &Config,
        control_plane: Arc<dyn ControlPlane>,
        live: Arc<dyn LiveDatabase>,
        db: Database,
        observer: Option<UpdateObserver>,
    ) -> Self {
        let mut waiter =
            SettlementWaiter::new(Arc::clone(&control_plane), WaitOptions::from(&config.settlement));
        if let Some(observer) = observer {
            waiter = waiter.with_observer(observer);
        }
        let store = GraphStore::new(db, Arc::clone(&control_plane), waiter.clone());
        let orchestrator = SnapshotOrchestrator::new(Arc::clone(&control_plane), waiter);
        let resolver = BranchResolver::new(control_plane, config.branches.preferred.clone());
        Self::new(store, orchestrator, resolver, live, config.script(), config.project.clone())
    }

    /// The underlying graph store.
    pub const fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The step script in effect.
    pub const fn script(&self) -> &DemoScript {
        &self.script
    }

    async fn active_project(&self, owner_id: &str) -> Result<Project> {
        self.store
            .get_latest_project_for_owner(owner_id)
            .await?
            .ok_or_else(|| RewindError::not_found("project", format!("owner {owner_id}")))
    }

    /// Loads the project's checkpoints and the index of `checkpoint_id`.
    async fn locate(&self, project: &Project, checkpoint_id: &str) -> Result<(Vec<Checkpoint>, usize)> {
        let checkpoints = self.store.list(&project.id).await?;
        let index = checkpoints
            .iter()
            .position(|c| c.id == checkpoint_id)
            .ok_or_else(|| RewindError::not_found("checkpoint", checkpoint_id))?;
        Ok((checkpoints, index))
    }

    async fn apply_step(&self, project: &Project, step: &Step) -> Result<()> {
        if step.mutation.is_noop() {
            return Ok(());
        }
        self.live.apply(&project.connection_string, step).await
    }

    /// Tears down the owner's project, provisions a new one and records the
    /// bootstrap checkpoint.
    pub async fn start_or_reset_project(&self, owner_id: &str) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(owner_id).await;

        let bootstrap =
            self.script.first().ok_or_else(|| RewindError::not_found("step", "bootstrap"))?;
        let name = self.project.project_name(owner_id);
        let project = self.store.reset_project(owner_id, &name).await?;
        let branch = self.resolver.resolve(&project.external_ref).await?;

        self.apply_step(&project, bootstrap).await?;
        let snapshot_id = self
            .orchestrator
            .create_snapshot(&project.external_ref, &branch.id, Some(&bootstrap.version), None)
            .await?;
        let checkpoint =
            self.store.insert(&project.id, bootstrap.prompt_text(), &snapshot_id).await?;

        info!(
            owner_id = %owner_id,
            project_id = %project.id,
            checkpoint_id = %checkpoint.id,
            "Project started"
        );
        Ok(checkpoint)
    }

    /// Restores the project to `target_id`, in either direction.
    ///
    /// Repeating the call re-applies the same snapshot and changes nothing
    /// in the graph.
    pub async fn advance_to(&self, owner_id: &str, target_id: &str) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(owner_id).await;

        let project = self.active_project(owner_id).await?;
        let (mut checkpoints, index) = self.locate(&project, target_id).await?;
        let target = checkpoints.swap_remove(index);
        let branch = self.resolver.resolve(&project.external_ref).await?;

        self.orchestrator.apply_snapshot(&project.external_ref, &target.snapshot_id, &branch.id).await?;
        info!(owner_id = %owner_id, checkpoint_id = %target.id, "Moved to checkpoint");
        Ok(target)
    }

    /// Moves forward from `current_id` to the script step that follows it.
    pub async fn advance_to_next(&self, owner_id: &str, current_id: &str) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(owner_id).await;

        let project = self.active_project(owner_id).await?;
        let (mut checkpoints, index) = self.locate(&project, current_id).await?;
        let current = checkpoints.swap_remove(index);
        let step = self.script.get(index + 1);
        self.advance_from(&project, &current, step).await
    }

    /// Moves forward from `current_id` through the edge for `step_id`.
    ///
    /// If `current_id` has no successor yet, the step's mutation runs against
    /// the live database, the result is snapshotted, and a new checkpoint is
    /// linked after the current one. Otherwise the existing successor's
    /// snapshot is restored and nothing is created.
    pub async fn advance_along(
        &self,
        owner_id: &str,
        current_id: &str,
        step_id: &str,
    ) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(owner_id).await;

        let project = self.active_project(owner_id).await?;
        let (mut checkpoints, index) = self.locate(&project, current_id).await?;
        let current = checkpoints.swap_remove(index);
        let step = self.script.find(step_id).ok_or_else(|| RewindError::not_found("step", step_id))?;
        self.advance_from(&project, &current, Some(step)).await
    }

    async fn advance_from(
        &self,
        project: &Project,
        current: &Checkpoint,
        step: Option<&Step>,
    ) -> Result<Checkpoint> {
        let branch = self.resolver.resolve(&project.external_ref).await?;

        if let Some(next_id) = &current.next_checkpoint_id {
            return self.restore_existing(project, next_id, &branch.id).await;
        }

        let step = step.ok_or_else(|| {
            RewindError::not_found("step", format!("after checkpoint {}", current.id))
        })?;

        self.apply_step(project, step).await?;
        let snapshot_id = self
            .orchestrator
            .create_snapshot(&project.external_ref, &branch.id, Some(&step.version), None)
            .await?;

        match self
            .store
            .insert_linked(&project.id, &current.id, step.prompt_text(), &snapshot_id)
            .await
        {
            Ok(checkpoint) => {
                info!(
                    project_id = %project.id,
                    checkpoint_id = %checkpoint.id,
                    step_id = %step.id,
                    "Created checkpoint"
                );
                Ok(checkpoint)
            }
            Err(RewindError::Storage(StorageError::Conflict { existing_next, .. })) => {
                warn!(
                    checkpoint_id = %current.id,
                    existing_next = %existing_next,
                    orphan_snapshot_id = %snapshot_id,
                    "Lost race to link next checkpoint; restoring the winner"
                );
                self.restore_existing(project, &existing_next, &branch.id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn restore_existing(
        &self,
        project: &Project,
        next_id: &str,
        branch_id: &str,
    ) -> Result<Checkpoint> {
        let next = self.store.get_checkpoint(next_id).await?;
        self.orchestrator.apply_snapshot(&project.external_ref, &next.snapshot_id, branch_id).await?;
        info!(project_id = %project.id, checkpoint_id = %next.id, "Restored existing checkpoint");
        Ok(next)
    }

    /// Re-snapshots the live branch into `checkpoint_id`.
    pub async fn refresh_snapshot(&self, owner_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(owner_id).await;

        let project = self.active_project(owner_id).await?;
        let (_, index) = self.locate(&project, checkpoint_id).await?;
        let branch = self.resolver.resolve(&project.external_ref).await?;
        let name = self.script.get(index).map(|step| step.version.as_str());

        let snapshot_id = self
            .orchestrator
            .create_snapshot(&project.external_ref, &branch.id, name, None)
            .await?;
        let checkpoint = self.store.update_snapshot(checkpoint_id, &snapshot_id).await?;
        info!(checkpoint_id = %checkpoint_id, snapshot_id = %snapshot_id, "Refreshed snapshot");
        Ok(checkpoint)
    }

    /// Describes the owner's history as seen from `current_id`, or from the
    /// latest checkpoint when `None`.
    pub async fn timeline(&self, owner_id: &str, current_id: Option<&str>) -> Result<Timeline> {
        let project = self.active_project(owner_id).await?;
        let checkpoints = self.store.list(&project.id).await?;
        let current_index = match current_id {
            Some(id) => checkpoints
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| RewindError::not_found("checkpoint", id))?,
            None => checkpoints
                .len()
                .checked_sub(1)
                .ok_or_else(|| RewindError::not_found("checkpoint", format!("project {}", project.id)))?,
        };

        let previous = current_index.checked_sub(1).and_then(|i| checkpoints.get(i).cloned());
        let has_next_checkpoint = checkpoints[current_index].has_next();
        let next_step = self.script.get(current_index + 1).cloned();

        Ok(Timeline { project, checkpoints, current_index, previous, next_step, has_next_checkpoint })
    }
}
