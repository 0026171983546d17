//! Neon control-plane implementation.
//!
//! This module provides an implementation of the `ControlPlane` trait for the
//! Neon v2 REST API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use rewind_abstraction::{
    Branch, ControlPlane, ControlPlaneError, OperationStatus, ProvisionedProject, RestoreRequest,
    SnapshotCreated, SnapshotRequest, SnapshotSummary,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

/// Default base URL of the Neon v2 API.
pub const DEFAULT_BASE_URL: &str = "https://console.neon.tech/api/v2";

/// Neon control-plane client.
#[derive(Debug, Clone)]
pub struct NeonControlPlane {
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Neon API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl NeonControlPlane {
    /// Creates a new client using the `NEON_API_KEY` environment variable.
    ///
    /// # Errors
    /// Returns `ControlPlaneError::Config` if the API key is not set.
    #[allow(clippy::disallowed_methods)] // env::var is needed for API key loading
    pub fn new() -> Result<Self, ControlPlaneError> {
        let api_key = env::var("NEON_API_KEY").map_err(|_| {
            ControlPlaneError::Config("NEON_API_KEY environment variable not set".to_string())
        })?;
        Self::with_api_key(api_key)
    }

    /// Creates a new client with an explicit API key.
    ///
    /// # Errors
    /// Returns `ControlPlaneError::Config` if the key is empty.
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ControlPlaneError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ControlPlaneError::Config("API key cannot be empty".to_string()));
        }
        Ok(Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), client: Client::new() })
    }

    /// Overrides the API base URL (used for proxies and tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns the API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and maps transport failures and non-2xx statuses.
    async fn send(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<Response, ControlPlaneError> {
        let response = request
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, action = %action, "Failed to send request to Neon API");
                ControlPlaneError::Request(format!("Failed to {action}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %body,
                action = %action,
                "Neon API returned error status"
            );
            return Err(ControlPlaneError::Api { status: status.as_u16(), body });
        }

        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(
        response: Response,
        action: &str,
    ) -> Result<T, ControlPlaneError> {
        response.json::<T>().await.map_err(|e| {
            error!(error = %e, action = %action, "Failed to parse Neon API response");
            ControlPlaneError::Serialization(format!("Failed to parse {action} response: {e}"))
        })
    }

    /// Like `parse`, but an empty body (e.g. a 204) yields `None`.
    async fn parse_optional<T: DeserializeOwned>(
        response: Response,
        action: &str,
    ) -> Result<Option<T>, ControlPlaneError> {
        let body = response.text().await.map_err(|e| {
            error!(error = %e, action = %action, "Failed to read Neon API response");
            ControlPlaneError::Request(format!("Failed to read {action} response: {e}"))
        })?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body).map(Some).map_err(|e| {
            error!(error = %e, action = %action, "Failed to parse Neon API response");
            ControlPlaneError::Serialization(format!("Failed to parse {action} response: {e}"))
        })
    }
}

#[async_trait]
impl ControlPlane for NeonControlPlane {
    async fn create_project(&self, name: &str) -> Result<ProvisionedProject, ControlPlaneError> {
        debug!(name = %name, "Creating Neon project");

        let body = CreateProjectRequest { project: ProjectSpec { name } };
        let request = self.client.post(self.url("/projects")).json(&body);
        let response = self.send(request, "create project").await?;
        let parsed: CreateProjectResponse = Self::parse(response, "create project").await?;

        let project_ref = parsed
            .project
            .and_then(|p| p.id)
            .or(parsed.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ControlPlaneError::Protocol("Project id missing in create response".to_string())
            })?;
        let connection_string = parsed
            .connection_uris
            .into_iter()
            .find_map(|uri| uri.connection_uri)
            .ok_or_else(|| {
                ControlPlaneError::Protocol("Database URL missing in create response".to_string())
            })?;

        Ok(ProvisionedProject {
            project_ref,
            connection_string,
            operation_ids: operation_ids(parsed.operations),
        })
    }

    async fn delete_project(&self, project_ref: &str) -> Result<(), ControlPlaneError> {
        debug!(project_ref = %project_ref, "Deleting Neon project");
        let request = self.client.delete(self.url(&format!("/projects/{project_ref}")));
        self.send(request, &format!("delete project {project_ref}")).await?;
        Ok(())
    }

    async fn list_branches(&self, project_ref: &str) -> Result<Vec<Branch>, ControlPlaneError> {
        debug!(project_ref = %project_ref, "Listing branches");
        let request = self.client.get(self.url(&format!("/projects/{project_ref}/branches")));
        let response = self.send(request, "list branches").await?;
        let envelope: ListEnvelope<WireBranch> = Self::parse(response, "list branches").await?;
        Ok(envelope.into_items().into_iter().filter_map(WireBranch::into_branch).collect())
    }

    async fn delete_branch(
        &self,
        project_ref: &str,
        branch_id: &str,
    ) -> Result<(), ControlPlaneError> {
        debug!(project_ref = %project_ref, branch_id = %branch_id, "Deleting branch");
        let request =
            self.client.delete(self.url(&format!("/projects/{project_ref}/branches/{branch_id}")));
        self.send(request, &format!("delete branch {branch_id}")).await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        project_ref: &str,
        branch_id: &str,
        request: &SnapshotRequest,
    ) -> Result<SnapshotCreated, ControlPlaneError> {
        let timestamp = request.timestamp.unwrap_or_else(Utc::now);
        debug!(
            project_ref = %project_ref,
            branch_id = %branch_id,
            name = ?request.name,
            "Creating snapshot"
        );

        let body = CreateSnapshotBody {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            name: request.name.as_deref(),
        };
        let http = self
            .client
            .post(self.url(&format!("/projects/{project_ref}/branches/{branch_id}/snapshot")))
            .json(&body);
        let response = self.send(http, "create snapshot").await?;
        let parsed: CreateSnapshotResponse = Self::parse(response, "create snapshot").await?;

        let snapshot_id = parsed
            .snapshot
            .and_then(|s| s.id)
            .or(parsed.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                error!("No snapshot id in Neon API response");
                ControlPlaneError::Protocol("Snapshot ID missing in response".to_string())
            })?;

        Ok(SnapshotCreated { snapshot_id, operation_ids: operation_ids(parsed.operations) })
    }

    async fn list_snapshots(
        &self,
        project_ref: &str,
    ) -> Result<Vec<SnapshotSummary>, ControlPlaneError> {
        debug!(project_ref = %project_ref, "Listing snapshots");
        let request = self.client.get(self.url(&format!("/projects/{project_ref}/snapshots")));
        let response = self.send(request, "list snapshots").await?;
        let envelope: ListEnvelope<WireSnapshot> = Self::parse(response, "list snapshots").await?;
        Ok(envelope.into_items().into_iter().filter_map(WireSnapshot::into_summary).collect())
    }

    async fn delete_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
    ) -> Result<(), ControlPlaneError> {
        debug!(project_ref = %project_ref, snapshot_id = %snapshot_id, "Deleting snapshot");
        let request = self
            .client
            .delete(self.url(&format!("/projects/{project_ref}/snapshots/{snapshot_id}")));
        self.send(request, &format!("delete snapshot {snapshot_id}")).await?;
        Ok(())
    }

    async fn restore_snapshot(
        &self,
        project_ref: &str,
        snapshot_id: &str,
        request: &RestoreRequest,
    ) -> Result<Vec<String>, ControlPlaneError> {
        debug!(
            project_ref = %project_ref,
            snapshot_id = %snapshot_id,
            target_branch_id = %request.target_branch_id,
            finalize = request.finalize,
            "Restoring snapshot"
        );

        let body = RestoreBody {
            name: &request.name,
            finalize_restore: request.finalize,
            target_branch_id: &request.target_branch_id,
        };
        let http = self
            .client
            .post(self.url(&format!("/projects/{project_ref}/snapshots/{snapshot_id}/restore")))
            .json(&body);
        let response = self.send(http, &format!("apply snapshot {snapshot_id}")).await?;
        let parsed: Option<RestoreResponse> =
            Self::parse_optional(response, "restore snapshot").await?;
        Ok(parsed.map(|r| operation_ids(r.operations)).unwrap_or_default())
    }

    async fn get_operation_status(
        &self,
        project_ref: &str,
        operation_id: &str,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let request = self
            .client
            .get(self.url(&format!("/projects/{project_ref}/operations/{operation_id}")));
        let response = self.send(request, &format!("get operation {operation_id}")).await?;
        let parsed: OperationResponse = Self::parse(response, "get operation").await?;

        let status = parsed.operation.and_then(|op| op.status).ok_or_else(|| {
            ControlPlaneError::Protocol(format!("Operation status missing for {operation_id}"))
        })?;
        status.parse()
    }
}

fn operation_ids(operations: Vec<OperationRef>) -> Vec<String> {
    operations.into_iter().filter_map(|op| op.id).filter(|id| !id.is_empty()).collect()
}

fn parse_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// Neon API request/response structures

#[derive(Debug, Serialize)]
struct CreateProjectRequest<'a> {
    project: ProjectSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ProjectSpec<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateSnapshotBody<'a> {
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct RestoreBody<'a> {
    name: &'a str,
    finalize_restore: bool,
    target_branch_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionUri {
    connection_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateProjectResponse {
    project: Option<IdOnly>,
    id: Option<String>,
    #[serde(default)]
    connection_uris: Vec<ConnectionUri>,
    #[serde(default)]
    operations: Vec<OperationRef>,
}

#[derive(Debug, Deserialize)]
struct CreateSnapshotResponse {
    snapshot: Option<IdOnly>,
    id: Option<String>,
    #[serde(default)]
    operations: Vec<OperationRef>,
}

#[derive(Debug, Deserialize)]
struct RestoreResponse {
    #[serde(default)]
    operations: Vec<OperationRef>,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    operation: Option<OperationBody>,
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    status: Option<String>,
}

/// List responses come back either as a bare array or wrapped in an object
/// under one of several keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Bare(Vec<T>),
    Wrapped {
        branches: Option<Vec<T>>,
        snapshots: Option<Vec<T>>,
        items: Option<Vec<T>>,
        data: Option<Vec<T>>,
    },
}

impl<T> ListEnvelope<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Self::Bare(items) => items,
            Self::Wrapped { branches, snapshots, items, data } => {
                branches.or(snapshots).or(items).or(data).unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBranch {
    id: Option<String>,
    name: Option<String>,
    created_at: Option<String>,
    parent_id: Option<String>,
    branch: Option<Box<WireBranch>>,
}

impl WireBranch {
    fn into_branch(self) -> Option<Branch> {
        let nested = self.branch.map(|b| *b);
        let (n_id, n_name, n_created, n_parent) = match nested {
            Some(b) => (b.id, b.name, b.created_at, b.parent_id),
            None => (None, None, None, None),
        };
        let id = self.id.or(n_id).filter(|id| !id.is_empty())?;
        Some(Branch {
            id,
            name: self.name.or(n_name),
            created_at: parse_datetime(self.created_at.or(n_created)),
            parent_id: self.parent_id.or(n_parent),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    id: Option<String>,
    #[serde(alias = "snapshotId")]
    snapshot_id: Option<String>,
    name: Option<String>,
    #[serde(alias = "createdAt")]
    created_at: Option<String>,
    snapshot: Option<Box<WireSnapshot>>,
}

impl WireSnapshot {
    fn into_summary(self) -> Option<SnapshotSummary> {
        let nested = self.snapshot.map(|s| *s);
        let (n_id, n_name, n_created) = match nested {
            Some(s) => (s.id, s.name, s.created_at),
            None => (None, None, None),
        };
        let id = self.id.or(n_id).or(self.snapshot_id).filter(|id| !id.is_empty())?;
        Some(SnapshotSummary {
            id,
            name: self.name.or(n_name),
            created_at: parse_datetime(self.created_at.or(n_created)),
        })
    }
}
