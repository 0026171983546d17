//! Lifecycle scenarios against the in-memory control plane.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use rewind_abstraction::{ControlPlane, ControlPlaneError, OperationStatus, SnapshotRequest};
use rewind_control_plane::{ControlPlaneCall, MockCall, MockControlPlane};
use rewind_core::{
    Checkpoint, CheckpointController, Config, Database, DemoScript, GraphStore, LiveDatabase,
    RecordingLiveDatabase, RewindError, Step, StepMutation,
};

const OWNER: &str = "owner-1";

struct Harness {
    mock: Arc<MockControlPlane>,
    live: Arc<RecordingLiveDatabase>,
    controller: Arc<CheckpointController>,
}

fn harness_with(mock: MockControlPlane, config: &Config) -> Harness {
    let mock = Arc::new(mock);
    let live = Arc::new(RecordingLiveDatabase::new());
    let controller = CheckpointController::from_config(
        config,
        Arc::clone(&mock) as Arc<dyn ControlPlane>,
        Arc::clone(&live) as Arc<dyn LiveDatabase>,
        Database::open_in_memory().unwrap(),
        None,
    );
    Harness { mock, live, controller: Arc::new(controller) }
}

fn harness() -> Harness {
    harness_with(MockControlPlane::new(), &Config::default())
}

impl Harness {
    async fn project_ref(&self) -> String {
        self.controller
            .store()
            .get_latest_project_for_owner(OWNER)
            .await
            .unwrap()
            .unwrap()
            .external_ref
    }

    async fn main_branch(&self) -> String {
        let project_ref = self.project_ref().await;
        self.mock.branches(&project_ref).remove(0).id
    }

    async fn live_snapshot(&self) -> Option<String> {
        let project_ref = self.project_ref().await;
        let branch = self.main_branch().await;
        self.mock.live_snapshot(&project_ref, &branch)
    }

    async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.controller.timeline(OWNER, None).await.unwrap().checkpoints
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_records_bootstrap_checkpoint() {
    let h = harness();

    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    assert_eq!(c0.prompt, "");
    assert!(c0.next_checkpoint_id.is_none());
    assert_eq!(h.checkpoints().await, vec![c0.clone()]);
    assert!(h.live.applied().is_empty());

    let created = h.mock.calls_of(MockCall::CreateProject);
    assert_eq!(
        created,
        vec![ControlPlaneCall::CreateProject {
            name: "snapshot-agent-use-case-demo-owner-1".to_string()
        }]
    );
    match &h.mock.calls_of(MockCall::CreateSnapshot)[0] {
        ControlPlaneCall::CreateSnapshot { name, .. } => assert_eq!(name.as_deref(), Some("v0")),
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_forward_back_forward() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();
    assert_eq!(c1.prompt, "Create me a simple contact book app");

    // c1 is current and has no successor: the step runs and c2 is created.
    let c2 = h.controller.advance_to_next(OWNER, &c1.id).await.unwrap();
    assert_eq!(c2.prompt, "Add role and company fields");
    assert_eq!(h.live.applied_step_ids(), vec!["cp1", "cp2"]);
    let stored_c1 = h.controller.store().get_checkpoint(&c1.id).await.unwrap();
    assert_eq!(stored_c1.next_checkpoint_id.as_deref(), Some(c2.id.as_str()));

    // Back to the bootstrap state.
    let back = h.controller.advance_to(OWNER, &c0.id).await.unwrap();
    assert_eq!(back, c0);
    assert_eq!(h.live_snapshot().await, Some(c0.snapshot_id.clone()));

    // Forward along the existing edge: restore only, no mutation.
    let snapshots_before = h.mock.count(MockCall::CreateSnapshot);
    let again = h.controller.advance_to_next(OWNER, &c1.id).await.unwrap();
    assert_eq!(again.id, c2.id);
    assert_eq!(h.live_snapshot().await, Some(c2.snapshot_id.clone()));
    assert_eq!(h.live.applied_step_ids(), vec!["cp1", "cp2"]);
    assert_eq!(h.mock.count(MockCall::CreateSnapshot), snapshots_before);
    assert_eq!(h.checkpoints().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_advance_to_next_twice_creates_one_checkpoint() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    let first = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();
    let second = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.checkpoints().await.len(), 2);
    assert_eq!(h.live.applied_step_ids(), vec!["cp1"]);
    assert_eq!(h.mock.count(MockCall::RestoreSnapshot), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_advance_to_next_is_serialized() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    let (a, b) = tokio::join!(
        h.controller.advance_to_next(OWNER, &c0.id),
        h.controller.advance_to_next(OWNER, &c0.id)
    );

    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(h.checkpoints().await.len(), 2);
    assert_eq!(h.live.applied_step_ids(), vec!["cp1"]);
}

#[tokio::test(start_paused = true)]
async fn test_advance_to_is_idempotent() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();
    let before = h.checkpoints().await;

    let first = h.controller.advance_to(OWNER, &c0.id).await.unwrap();
    let second = h.controller.advance_to(OWNER, &c0.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.checkpoints().await, before);
    assert_eq!(h.live_snapshot().await, Some(c0.snapshot_id));
    assert_eq!(h.mock.count(MockCall::RestoreSnapshot), 2);
    // Jumping forward works the same way.
    assert_eq!(h.controller.advance_to(OWNER, &c1.id).await.unwrap().id, c1.id);
}

#[tokio::test(start_paused = true)]
async fn test_advance_to_unknown_checkpoint_fails() {
    let h = harness();
    h.controller.start_or_reset_project(OWNER).await.unwrap();

    let err = h.controller.advance_to(OWNER, "no-such-checkpoint").await.unwrap_err();
    assert!(matches!(err, RewindError::NotFound { kind: "checkpoint", .. }));
    assert_eq!(h.mock.count(MockCall::RestoreSnapshot), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transitions_without_project_fail() {
    let h = harness();
    let err = h.controller.advance_to_next(OWNER, "c0").await.unwrap_err();
    assert!(matches!(err, RewindError::NotFound { kind: "project", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_missing_target_branch_is_fatal() {
    let h = harness_with(MockControlPlane::new().with_default_branch("dev"), &Config::default());
    let err = h.controller.start_or_reset_project(OWNER).await.unwrap_err();
    assert!(matches!(err, RewindError::NotFound { kind: "branch", .. }));
    assert_eq!(h.mock.count(MockCall::CreateSnapshot), 0);
}

#[tokio::test(start_paused = true)]
async fn test_production_branch_fallback() {
    let h = harness_with(
        MockControlPlane::new().with_default_branch("production"),
        &Config::default(),
    );
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();
    h.controller.advance_to(OWNER, &c0.id).await.unwrap();
    assert_eq!(h.live_snapshot().await, Some(c0.snapshot_id.clone()));
    assert_ne!(c1.snapshot_id, c0.snapshot_id);
}

#[tokio::test(start_paused = true)]
async fn test_end_of_script_is_not_found() {
    let h = harness();
    let mut current = h.controller.start_or_reset_project(OWNER).await.unwrap();
    for _ in 1..h.controller.script().len() {
        current = h.controller.advance_to_next(OWNER, &current.id).await.unwrap();
    }

    let err = h.controller.advance_to_next(OWNER, &current.id).await.unwrap_err();
    assert!(matches!(err, RewindError::NotFound { kind: "step", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_next_pointers_form_acyclic_chain() {
    let h = harness();
    let mut current = h.controller.start_or_reset_project(OWNER).await.unwrap();
    for _ in 1..h.controller.script().len() {
        current = h.controller.advance_to_next(OWNER, &current.id).await.unwrap();
    }
    let checkpoints = h.checkpoints().await;

    let mut visited = HashSet::new();
    let mut cursor = Some(checkpoints[0].id.clone());
    while let Some(id) = cursor {
        assert!(visited.insert(id.clone()), "cycle through {id}");
        cursor = checkpoints.iter().find(|c| c.id == id).unwrap().next_checkpoint_id.clone();
    }
    assert_eq!(visited.len(), checkpoints.len());

    let successors: Vec<_> =
        checkpoints.iter().filter_map(|c| c.next_checkpoint_id.clone()).collect();
    let unique: HashSet<_> = successors.iter().collect();
    assert_eq!(unique.len(), successors.len());
}

#[tokio::test(start_paused = true)]
async fn test_reset_leaves_single_project() {
    let h = harness();
    let old_c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let old_c1 = h.controller.advance_to_next(OWNER, &old_c0.id).await.unwrap();
    let old_ref = h.project_ref().await;

    let new_c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    let projects = h.controller.store().list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_ne!(projects[0].external_ref, old_ref);
    assert!(!h.mock.has_project(&old_ref));
    assert_eq!(h.checkpoints().await, vec![new_c0]);
    assert!(matches!(
        h.controller.advance_to(OWNER, &old_c1.id).await,
        Err(RewindError::NotFound { kind: "checkpoint", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reset_remote_delete_failure_keeps_local_rows() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();

    h.mock.fail_next(
        MockCall::DeleteProject,
        ControlPlaneError::Api { status: 503, body: "maintenance".to_string() },
    );
    let err = h.controller.start_or_reset_project(OWNER).await.unwrap_err();

    assert!(matches!(err, RewindError::ControlPlane(ControlPlaneError::Api { status: 503, .. })));
    let ids: Vec<_> = h.checkpoints().await.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![c0.id, c1.id]);
    assert_eq!(h.mock.count(MockCall::CreateProject), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settlement_timeout_surfaces() {
    let mut config = Config::default();
    config.settlement.timeout_secs = 30;
    // Provisioning and snapshots enqueue nothing; restores never settle.
    let mock = MockControlPlane::new()
        .with_operation_script(vec![OperationStatus::Running])
        .with_project_operations(0);
    let h = harness_with(mock, &config);
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    let err = h.controller.advance_to(OWNER, &c0.id).await.unwrap_err();

    match err {
        RewindError::SettlementTimeout { last_status, .. } => {
            assert_eq!(last_status, OperationStatus::Running);
        }
        other => panic!("Expected SettlementTimeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_refresh_snapshot_replaces_snapshot() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();

    let refreshed = h.controller.refresh_snapshot(OWNER, &c1.id).await.unwrap();

    assert_eq!(refreshed.id, c1.id);
    assert_ne!(refreshed.snapshot_id, c1.snapshot_id);
    assert_eq!(
        h.controller.store().get_checkpoint(&c1.id).await.unwrap().snapshot_id,
        refreshed.snapshot_id
    );
    match h.mock.calls_of(MockCall::CreateSnapshot).last().unwrap() {
        ControlPlaneCall::CreateSnapshot { name, .. } => assert_eq!(name.as_deref(), Some("v1")),
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeline_view() {
    let h = harness();
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();
    let c1 = h.controller.advance_to_next(OWNER, &c0.id).await.unwrap();

    let at_c0 = h.controller.timeline(OWNER, Some(&c0.id)).await.unwrap();
    assert_eq!(at_c0.current_index, 0);
    assert!(at_c0.previous.is_none());
    assert!(at_c0.has_next_checkpoint);
    assert_eq!(at_c0.next_step.unwrap().id, "cp1");

    let latest = h.controller.timeline(OWNER, None).await.unwrap();
    assert_eq!(latest.current().unwrap().id, c1.id);
    assert_eq!(latest.previous.unwrap().id, c0.id);
    assert!(!latest.has_next_checkpoint);
    assert_eq!(latest.next_step.unwrap().id, "cp2");

    assert!(matches!(
        h.controller.timeline(OWNER, Some("missing")).await,
        Err(RewindError::NotFound { kind: "checkpoint", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_advance_along_named_step_and_custom_script() {
    let mut config = Config::default();
    config.script = Some(DemoScript {
        steps: vec![
            Step { id: "base".to_string(), prompt: None, version: "v0".to_string(), mutation: StepMutation::None },
            Step {
                id: "notes".to_string(),
                prompt: Some("Add notes".to_string()),
                version: "v1".to_string(),
                mutation: StepMutation::Sql {
                    statements: vec!["CREATE TABLE notes (id SERIAL PRIMARY KEY)".to_string()],
                },
            },
        ],
    });
    let h = harness_with(MockControlPlane::new(), &config);
    let c0 = h.controller.start_or_reset_project(OWNER).await.unwrap();

    let c1 = h.controller.advance_along(OWNER, &c0.id, "notes").await.unwrap();
    assert_eq!(c1.prompt, "Add notes");
    assert_eq!(h.live.applied()[0].statements, vec!["CREATE TABLE notes (id SERIAL PRIMARY KEY)"]);

    let err = h.controller.advance_along(OWNER, &c1.id, "missing").await.unwrap_err();
    assert!(matches!(err, RewindError::NotFound { kind: "step", .. }));
}

/// Live database that, while a step runs, lets another writer link a
/// successor first.
struct RacingLiveDatabase {
    store: OnceLock<GraphStore>,
    race: Mutex<Option<(String, String, String)>>,
}

#[async_trait]
impl LiveDatabase for RacingLiveDatabase {
    async fn apply(&self, _connection_string: &str, _step: &Step) -> rewind_core::Result<()> {
        let race = self.race.lock().unwrap().take();
        if let Some((project_id, parent_id, snapshot_id)) = race {
            let store = self.store.get().unwrap();
            store.insert_linked(&project_id, &parent_id, "winner", &snapshot_id).await?;
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_race_restores_winner() {
    let mock = Arc::new(MockControlPlane::new());
    let live = Arc::new(RacingLiveDatabase { store: OnceLock::new(), race: Mutex::new(None) });
    let controller = CheckpointController::from_config(
        &Config::default(),
        Arc::clone(&mock) as Arc<dyn ControlPlane>,
        Arc::clone(&live) as Arc<dyn LiveDatabase>,
        Database::open_in_memory().unwrap(),
        None,
    );
    live.store.set(controller.store().clone()).unwrap();

    let c0 = controller.start_or_reset_project(OWNER).await.unwrap();
    let project = controller.store().get_latest_project_for_owner(OWNER).await.unwrap().unwrap();
    let branch = mock.branches(&project.external_ref).remove(0);
    let winner_snapshot = mock
        .create_snapshot(&project.external_ref, &branch.id, &SnapshotRequest::default())
        .await
        .unwrap()
        .snapshot_id;
    *live.race.lock().unwrap() = Some((project.id.clone(), c0.id.clone(), winner_snapshot.clone()));

    let result = controller.advance_to_next(OWNER, &c0.id).await.unwrap();

    assert_eq!(result.prompt, "winner");
    assert_eq!(result.snapshot_id, winner_snapshot);
    assert_eq!(mock.live_snapshot(&project.external_ref, &branch.id), Some(winner_snapshot));
    assert_eq!(controller.store().list(&project.id).await.unwrap().len(), 2);
}
