//! In-memory control plane.
//!
//! `MockControlPlane` keeps projects, branches and snapshots in memory, hands
//! out operation ids whose statuses follow a configurable script, records
//! every call, and can be told to fail the next call of a given kind.

use async_trait::async_trait;
use rewind_abstraction::{
    Branch, ControlPlane, ControlPlaneError, OperationStatus, ProvisionedProject, RestoreRequest,
    SnapshotCreated, SnapshotRequest, SnapshotSummary,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Kind of control-plane call, used for failure injection and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    CreateProject,
    DeleteProject,
    ListBranches,
    DeleteBranch,
    CreateSnapshot,
    ListSnapshots,
    DeleteSnapshot,
    RestoreSnapshot,
    GetOperationStatus,
}

/// A recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    CreateProject { name: String },
    DeleteProject { project_ref: String },
    ListBranches { project_ref: String },
    DeleteBranch { project_ref: String, branch_id: String },
    CreateSnapshot { project_ref: String, branch_id: String, name: Option<String> },
    ListSnapshots { project_ref: String },
    DeleteSnapshot { project_ref: String, snapshot_id: String },
    RestoreSnapshot { project_ref: String, snapshot_id: String, target_branch_id: String, finalize: bool },
    GetOperationStatus { project_ref: String, operation_id: String },
}

impl ControlPlaneCall {
    /// Returns the kind of this call.
    #[must_use]
    pub const fn kind(&self) -> MockCall {
        match self {
            Self::CreateProject { .. } => MockCall::CreateProject,
            Self::DeleteProject { .. } => MockCall::DeleteProject,
            Self::ListBranches { .. } => MockCall::ListBranches,
            Self::DeleteBranch { .. } => MockCall::DeleteBranch,
            Self::CreateSnapshot { .. } => MockCall::CreateSnapshot,
            Self::ListSnapshots { .. } => MockCall::ListSnapshots,
            Self::DeleteSnapshot { .. } => MockCall::DeleteSnapshot,
            Self::RestoreSnapshot { .. } => MockCall::RestoreSnapshot,
            Self::GetOperationStatus { .. } => MockCall::GetOperationStatus,
        }
    }
}

#[derive(Debug, Default)]
struct MockProject {
    branches: Vec<Branch>,
    snapshots: Vec<SnapshotSummary>,
    /// Snapshot most recently restored onto each branch.
    live: HashMap<String, String>,
}

#[derive(Debug)]
struct MockState {
    projects: BTreeMap<String, MockProject>,
    operations: HashMap<String, VecDeque<OperationStatus>>,
    calls: Vec<ControlPlaneCall>,
    failures: HashMap<MockCall, VecDeque<ControlPlaneError>>,
    next_id: u64,
    default_branch: String,
    operation_script: Vec<OperationStatus>,
    restore_operations: usize,
    snapshot_operations: usize,
    project_operations: usize,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn take_failure(&mut self, kind: MockCall) -> Result<(), ControlPlaneError> {
        match self.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_operations(&mut self, count: usize) -> Vec<String> {
        (0..count)
            .map(|_| {
                let id = self.next_id("op");
                self.operations.insert(id.clone(), self.operation_script.iter().copied().collect());
                id
            })
            .collect()
    }

    fn project_mut(&mut self, project_ref: &str) -> Result<&mut MockProject, ControlPlaneError> {
        self.projects.get_mut(project_ref).ok_or_else(|| not_found("project", project_ref))
    }
}

fn not_found(kind: &str, id: &str) -> ControlPlaneError {
    ControlPlaneError::Api { status: 404, body: format!("{kind} {id} not found") }
}

/// A mock implementation of the `ControlPlane` trait for testing and local runs.
#[derive(Debug)]
pub struct MockControlPlane {
    state: Mutex<MockState>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Creates a mock whose new projects get a single "main" branch, whose
    /// restores enqueue three operations, and whose operations report
    /// `running` once and then `finished`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                projects: BTreeMap::new(),
                operations: HashMap::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
                next_id: 0,
                default_branch: "main".to_string(),
                operation_script: vec![OperationStatus::Running, OperationStatus::Finished],
                restore_operations: 3,
                snapshot_operations: 0,
                project_operations: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the name of the branch new projects start with.
    #[must_use]
    pub fn with_default_branch(self, name: impl Into<String>) -> Self {
        self.state().default_branch = name.into();
        self
    }

    /// Sets the status sequence reported by newly issued operations. The last
    /// status repeats forever.
    #[must_use]
    pub fn with_operation_script(self, script: Vec<OperationStatus>) -> Self {
        self.state().operation_script = script;
        self
    }

    /// Sets how many operations a restore enqueues.
    #[must_use]
    pub fn with_restore_operations(self, count: usize) -> Self {
        self.state().restore_operations = count;
        self
    }

    /// Sets how many operations a snapshot creation enqueues.
    #[must_use]
    pub fn with_snapshot_operations(self, count: usize) -> Self {
        self.state().snapshot_operations = count;
        self
    }

    /// Sets how many operations provisioning a project enqueues.
    #[must_use]
    pub fn with_project_operations(self, count: usize) -> Self {
        self.state().project_operations = count;
        self
    }

    /// Seeds a project with the given branch names.
    pub fn insert_project(&self, project_ref: &str, branch_names: &[&str]) {
        let mut state = self.state();
        let branches = branch_names
            .iter()
            .map(|name| {
                let id = state.next_id("br");
                Branch::named(id, *name)
            })
            .collect();
        state
            .projects
            .insert(project_ref.to_string(), MockProject { branches, ..MockProject::default() });
    }

    /// Adds a branch to an existing project.
    pub fn add_branch(&self, project_ref: &str, name: &str) -> Option<String> {
        let mut state = self.state();
        let id = state.next_id("br");
        let project = state.projects.get_mut(project_ref)?;
        project.branches.push(Branch::named(id.clone(), name));
        Some(id)
    }

    /// Registers an operation with an explicit status sequence.
    pub fn script_operation(&self, operation_id: &str, statuses: Vec<OperationStatus>) {
        self.state().operations.insert(operation_id.to_string(), statuses.into());
    }

    /// Makes the next call of the given kind fail with `error`.
    pub fn fail_next(&self, kind: MockCall, error: ControlPlaneError) {
        self.state().failures.entry(kind).or_default().push_back(error);
    }

    /// Returns every recorded call, oldest first.
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.state().calls.clone()
    }

    /// Counts recorded calls of one kind.
    pub fn count(&self, kind: MockCall) -> usize {
        self.state().calls.iter().filter(|c| c.kind() == kind).count()
    }

    /// Returns the recorded calls of one kind.
    pub fn calls_of(&self, kind: MockCall) -> Vec<ControlPlaneCall> {
        self.state().calls.iter().filter(|c| c.kind() == kind).cloned().collect()
    }

    /// Returns `true` if the project exists.
    pub fn has_project(&self, project_ref: &str) -> bool {
        self.state().projects.contains_key(project_ref)
    }

    /// Returns the refs of all existing projects.
    pub fn project_refs(&self) -> Vec<String> {
        self.state().projects.keys().cloned().collect()
    }

    /// Returns the snapshot ids stored for a project.
    pub fn snapshot_ids(&self, project_ref: &str) -> Vec<String> {
        self.state()
            .projects
            .get(project_ref)
            .map(|p| p.snapshots.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the branches of a project.
    pub fn branches(&self, project_ref: &str) -> Vec<Branch> {
        self.state().projects.get(project_ref).map(|p| p.branches.clone()).unwrap_or_default()
    }

    /// Returns the snapshot most recently restored onto a branch.
    pub fn live_snapshot(&self, project_ref: &str, branch_id: &str) -> Option<String> {
        self.state().projects.get(project_ref).and_then(|p| p.live.get(branch_id).cloned())
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create_project(&self, name: &str) -> Result<ProvisionedProject, ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::CreateProject { name: name.to_string() });
        state.take_failure(MockCall::CreateProject)?;

        let project_ref = state.next_id("proj");
        let branch_id = state.next_id("br");
        let default_branch = state.default_branch.clone();
        state.projects.insert(
            project_ref.clone(),
            MockProject {
                branches: vec![Branch::named(branch_id, default_branch)],
                ..MockProject::default()
            },
        );
        let count = state.project_operations;
        let operation_ids = state.issue_operations(count);
        debug!(project_ref = %project_ref, "Mock project created");

        Ok(ProvisionedProject {
            connection_string: format!("postgresql://mock@localhost/{project_ref}"),
            project_ref,
            operation_ids,
        })
    }

    async fn delete_project(&self, project_ref: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state
            .calls
            .push(ControlPlaneCall::DeleteProject { project_ref: project_ref.to_string() });
        state.take_failure(MockCall::DeleteProject)?;
        state.projects.remove(project_ref).map(|_| ()).ok_or_else(|| not_found("project", project_ref))
    }

    async fn list_branches(&self, project_ref: &str) -> Result<Vec<Branch>, ControlPlaneError> {
        let mut state = self.state();
        state
            .calls
            .push(ControlPlaneCall::ListBranches { project_ref: project_ref.to_string() });
        state.take_failure(MockCall::ListBranches)?;
        Ok(state.project_mut(project_ref)?.branches.clone())
    }

    async fn delete_branch(
        &self,
        project_ref: &str,
        branch_id: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::DeleteBranch {
            project_ref: project_ref.to_string(),
            branch_id: branch_id.to_string(),
        });
        state.take_failure(MockCall::DeleteBranch)?;
        let project = state.project_mut(project_ref)?;
        let before = project.branches.len();
        project.branches.retain(|b| b.id != branch_id);
        if project.branches.len() == before {
            return Err(not_found("branch", branch_id));
        }
        Ok(())
    }

    async fn create_snapshot(
        &self,
        project_ref: &str,
        branch_id: &str,
        request: &SnapshotRequest,
    ) -> Result<SnapshotCreated, ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::CreateSnapshot {
            project_ref: project_ref.to_string(),
            branch_id: branch_id.to_string(),
            name: request.name.clone(),
        });
        state.take_failure(MockCall::CreateSnapshot)?;

        let snapshot_id = state.next_id("snap");
        let project = state.project_mut(project_ref)?;
        if !project.branches.iter().any(|b| b.id == branch_id) {
            return Err(not_found("branch", branch_id));
        }
        project.snapshots.push(SnapshotSummary {
            id: snapshot_id.clone(),
            name: request.name.clone(),
            created_at: request.timestamp,
        });
        let count = state.snapshot_operations;
        let operation_ids = state.issue_operations(count);
        Ok(SnapshotCreated { snapshot_id, operation_ids })
    }

    async fn list_snapshots(
        &self,
        project_ref: &str,
    ) -> Result<Vec<SnapshotSummary>, ControlPlaneError> {
        let mut state = self.state();
        state
            .calls
            .push(ControlPlaneCall::ListSnapshots { project_ref: project_ref.to_string() });
        state.take_failure(MockCall::ListSnapshots)?;
        Ok(state.project_mut(project_ref)?.snapshots.clone())
    }

    async fn delete_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::DeleteSnapshot {
            project_ref: project_ref.to_string(),
            snapshot_id: snapshot_id.to_string(),
        });
        state.take_failure(MockCall::DeleteSnapshot)?;
        let project = state.project_mut(project_ref)?;
        let before = project.snapshots.len();
        project.snapshots.retain(|s| s.id != snapshot_id);
        if project.snapshots.len() == before {
            return Err(not_found("snapshot", snapshot_id));
        }
        Ok(())
    }

    async fn restore_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
        request: &RestoreRequest,
    ) -> Result<Vec<String>, ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::RestoreSnapshot {
            project_ref: project_ref.to_string(),
            snapshot_id: snapshot_id.to_string(),
            target_branch_id: request.target_branch_id.clone(),
            finalize: request.finalize,
        });
        state.take_failure(MockCall::RestoreSnapshot)?;

        let project = state.project_mut(project_ref)?;
        if !project.snapshots.iter().any(|s| s.id == snapshot_id) {
            return Err(not_found("snapshot", snapshot_id));
        }
        if !project.branches.iter().any(|b| b.id == request.target_branch_id) {
            return Err(not_found("branch", &request.target_branch_id));
        }
        project.live.insert(request.target_branch_id.clone(), snapshot_id.to_string());
        let count = state.restore_operations;
        Ok(state.issue_operations(count))
    }

    async fn get_operation_status(
        &self,
        project_ref: &str,
        operation_id: &str,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let mut state = self.state();
        state.calls.push(ControlPlaneCall::GetOperationStatus {
            project_ref: project_ref.to_string(),
            operation_id: operation_id.to_string(),
        });
        state.take_failure(MockCall::GetOperationStatus)?;

        let queue =
            state.operations.get_mut(operation_id).ok_or_else(|| not_found("operation", operation_id))?;
        let status = if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() };
        status.ok_or_else(|| {
            ControlPlaneError::Protocol(format!("Operation status missing for {operation_id}"))
        })
    }
}
