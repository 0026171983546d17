//! Integration tests for the Neon client against a local mock server.

use mockito::Matcher;
use rewind_abstraction::{ControlPlane, ControlPlaneError, OperationStatus, RestoreRequest, SnapshotRequest};
use rewind_control_plane::NeonControlPlane;

fn client(server: &mockito::Server) -> NeonControlPlane {
    NeonControlPlane::with_api_key("test-key").unwrap().with_base_url(server.url())
}

#[tokio::test]
async fn test_create_project_parses_ids_and_operations() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/projects")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJsonString(
            r#"{"project":{"name":"snapshot-agent-use-case-demo-u1"}}"#.to_string(),
        ))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "project": {"id": "proj-abc"},
                "connection_uris": [{"connection_uri": "postgresql://u:p@host/db"}],
                "operations": [{"id": "op-1"}, {"id": "op-2"}]
            }"#,
        )
        .create_async()
        .await;

    let project =
        client(&server).create_project("snapshot-agent-use-case-demo-u1").await.unwrap();

    assert_eq!(project.project_ref, "proj-abc");
    assert_eq!(project.connection_string, "postgresql://u:p@host/db");
    assert_eq!(project.operation_ids, vec!["op-1".to_string(), "op-2".to_string()]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_project_without_connection_uri_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/projects")
        .with_status(201)
        .with_body(r#"{"project": {"id": "proj-abc"}, "connection_uris": []}"#)
        .create_async()
        .await;

    let err = client(&server).create_project("demo").await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Protocol(_)));
}

#[tokio::test]
async fn test_list_branches_accepts_wrapped_and_nested_shapes() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/projects/proj-1/branches")
        .with_status(200)
        .with_body(
            r#"{
                "branches": [
                    {"id": "br-main", "name": "main"},
                    {"branch": {"id": "br-restored", "name": "restored_1700000000000"}},
                    {"name": "no-id"}
                ]
            }"#,
        )
        .create_async()
        .await;

    let branches = client(&server).list_branches("proj-1").await.unwrap();
    let ids: Vec<_> = branches.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["br-main", "br-restored"]);
    assert!(branches[0].has_name("main"));
}

#[tokio::test]
async fn test_list_branches_accepts_bare_array() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/projects/proj-1/branches")
        .with_status(200)
        .with_body(r#"[{"id": "br-1", "name": "production"}]"#)
        .create_async()
        .await;

    let branches = client(&server).list_branches("proj-1").await.unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].has_name("production"));
}

#[tokio::test]
async fn test_create_snapshot_sends_name_and_reads_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/projects/proj-1/branches/br-main/snapshot")
        .match_body(Matcher::PartialJsonString(r#"{"name":"v1"}"#.to_string()))
        .with_status(200)
        .with_body(r#"{"snapshot": {"id": "snap-42"}, "operations": []}"#)
        .create_async()
        .await;

    let created = client(&server)
        .create_snapshot(
            "proj-1",
            "br-main",
            &SnapshotRequest { name: Some("v1".to_string()), timestamp: None },
        )
        .await
        .unwrap();

    assert_eq!(created.snapshot_id, "snap-42");
    assert!(created.operation_ids.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_snapshot_without_id_fails() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/projects/proj-1/branches/br-main/snapshot")
        .with_status(200)
        .with_body(r#"{"snapshot": {}}"#)
        .create_async()
        .await;

    let err = client(&server)
        .create_snapshot("proj-1", "br-main", &SnapshotRequest::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Snapshot ID missing"));
}

#[tokio::test]
async fn test_restore_snapshot_posts_finalize_and_returns_operations() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/projects/proj-1/snapshots/snap-1/restore")
        .match_body(Matcher::Json(serde_json::json!({
            "name": "restored_1700000000000",
            "finalize_restore": true,
            "target_branch_id": "br-main"
        })))
        .with_status(200)
        .with_body(r#"{"operations": [{"id": "op-a"}, {"id": "op-b"}, {"id": "op-c"}]}"#)
        .create_async()
        .await;

    let ops = client(&server)
        .restore_snapshot(
            "proj-1",
            "snap-1",
            &RestoreRequest {
                target_branch_id: "br-main".to_string(),
                name: "restored_1700000000000".to_string(),
                finalize: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(ops, vec!["op-a", "op-b", "op-c"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_restore_snapshot_without_body_has_no_operations() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/projects/proj-1/snapshots/snap-1/restore")
        .with_status(204)
        .create_async()
        .await;

    let ops = client(&server)
        .restore_snapshot(
            "proj-1",
            "snap-1",
            &RestoreRequest {
                target_branch_id: "br-main".to_string(),
                name: "restored_1700000000000".to_string(),
                finalize: true,
            },
        )
        .await
        .unwrap();

    assert!(ops.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_restore_snapshot_invalid_body_is_serialization_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/projects/proj-1/snapshots/snap-1/restore")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let err = client(&server)
        .restore_snapshot(
            "proj-1",
            "snap-1",
            &RestoreRequest {
                target_branch_id: "br-main".to_string(),
                name: "restored_1700000000000".to_string(),
                finalize: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::Serialization(_)));
}

#[tokio::test]
async fn test_get_operation_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/projects/proj-1/operations/op-1")
        .with_status(200)
        .with_body(r#"{"operation": {"id": "op-1", "status": "running"}}"#)
        .create_async()
        .await;

    let status = client(&server).get_operation_status("proj-1", "op-1").await.unwrap();
    assert_eq!(status, OperationStatus::Running);
}

#[tokio::test]
async fn test_get_operation_status_missing_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/projects/proj-1/operations/op-1")
        .with_status(200)
        .with_body(r#"{"operation": {"id": "op-1"}}"#)
        .create_async()
        .await;

    let err = client(&server).get_operation_status("proj-1", "op-1").await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Protocol(_)));
}

#[tokio::test]
async fn test_non_success_status_carries_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/projects/proj-1/snapshots/snap-1")
        .with_status(423)
        .with_body(r#"{"message": "project already has running operations"}"#)
        .create_async()
        .await;

    let err = client(&server).delete_snapshot("proj-1", "snap-1").await.unwrap_err();
    assert_eq!(err.status(), Some(423));
    assert!(err.to_string().contains("running operations"));
}

#[tokio::test]
async fn test_list_snapshots_and_delete_branch() {
    let mut server = mockito::Server::new_async().await;
    let _list = server
        .mock("GET", "/projects/proj-1/snapshots")
        .with_status(200)
        .with_body(
            r#"{"snapshots": [{"id": "snap-1", "name": "v0", "created_at": "2024-05-01T10:00:00Z"}]}"#,
        )
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/projects/proj-1/branches/br-old")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let plane = client(&server);
    let snapshots = plane.list_snapshots("proj-1").await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name.as_deref(), Some("v0"));
    assert!(snapshots[0].created_at.is_some());

    plane.delete_branch("proj-1", "br-old").await.unwrap();
    delete.assert_async().await;
}

#[tokio::test]
async fn test_delete_project_sends_authorized_delete() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("DELETE", "/projects/proj-1")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body(r#"{"project": {"id": "proj-1"}}"#)
        .create_async()
        .await;

    client(&server).delete_project("proj-1").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_delete_project_missing_reports_404() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/projects/proj-gone")
        .with_status(404)
        .with_body(r#"{"message": "project not found"}"#)
        .create_async()
        .await;

    let err = client(&server).delete_project("proj-gone").await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Api { status: 404, .. }));
    assert_eq!(err.status(), Some(404));
}
