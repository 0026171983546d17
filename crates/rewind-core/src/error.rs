//! Error types for Rewind Core.

use std::time::Duration;

use rewind_abstraction::{ControlPlaneError, OperationStatus};
use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Core error type for Rewind operations.
#[derive(Error, Debug)]
pub enum RewindError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A project, checkpoint, branch or step does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("project", "checkpoint", "branch", "step").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Control-plane call failed
    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// An operation did not settle in time
    #[error(
        "Timed out waiting for operation {operation_id} to settle after {timeout:?} (last status: {last_status})"
    )]
    SettlementTimeout {
        /// Operation that was polled.
        operation_id: String,
        /// Last status observed before giving up.
        last_status: OperationStatus,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// An operation reported `failed` while fail-fast is enabled
    #[error("Operation {operation_id} failed")]
    OperationFailed {
        /// Operation that failed.
        operation_id: String,
    },

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Application database errors
    #[error("Live database error: {0}")]
    LiveDatabase(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RewindError {
    /// Creates a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Returns `true` if the failed call may be retried blindly.
    ///
    /// Nothing is retried automatically: a failed restore can be re-issued
    /// by the caller, but a failed "create next" may already have left a
    /// snapshot or row behind.
    pub const fn is_retry_safe(&self) -> bool {
        false
    }
}

/// Result type alias for Rewind operations.
pub type Result<T> = std::result::Result<T, RewindError>;
