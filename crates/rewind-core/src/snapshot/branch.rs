//! Restore-target branch resolution.

use std::sync::Arc;

use rewind_abstraction::{Branch, ControlPlane};
use tracing::debug;

use crate::error::{Result, RewindError};

/// Finds the live branch a project's snapshots are restored onto.
#[derive(Clone)]
pub struct BranchResolver {
    control_plane: Arc<dyn ControlPlane>,
    preferred: Vec<String>,
}

impl std::fmt::Debug for BranchResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchResolver").field("preferred", &self.preferred).finish_non_exhaustive()
    }
}

impl BranchResolver {
    /// Creates a resolver that tries `preferred` names in order.
    pub fn new(control_plane: Arc<dyn ControlPlane>, preferred: Vec<String>) -> Self {
        Self { control_plane, preferred }
    }

    /// Returns the preferred branch names, most preferred first.
    pub fn preferred(&self) -> &[String] {
        &self.preferred
    }

    /// Lists the project's branches and picks the first preferred name
    /// present.
    ///
    /// # Errors
    /// Returns `RewindError::NotFound` if no preferred branch exists.
    pub async fn resolve(&self, project_ref: &str) -> Result<Branch> {
        let branches = self.control_plane.list_branches(project_ref).await?;
        let branch = self.select(&branches).cloned().ok_or_else(|| {
            RewindError::not_found(
                "branch",
                format!("{} in project {}", self.preferred.join(" or "), project_ref),
            )
        })?;
        debug!(project_ref = %project_ref, branch_id = %branch.id, "Resolved target branch");
        Ok(branch)
    }

    /// Picks the preferred branch from a listing.
    pub fn select<'a>(&self, branches: &'a [Branch]) -> Option<&'a Branch> {
        self.preferred
            .iter()
            .find_map(|name| branches.iter().find(|branch| branch.has_name(name)))
    }
}
