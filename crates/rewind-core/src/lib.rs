//! Rewind Core - checkpointed database history over a snapshot control plane.
//!
//! This crate provides the core functionality for Rewind, including:
//! - Configuration management
//! - Error handling
//! - Project and checkpoint storage (SQLite)
//! - Operation settlement, snapshot create/restore and branch resolution
//! - The checkpoint lifecycle controller and bulk maintenance
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rewind_abstraction::ControlPlane;
//! use rewind_core::{CheckpointController, Config, Database, PostgresLiveDatabase};
//!
//! async fn start(control_plane: Arc<dyn ControlPlane>) -> rewind_core::Result<()> {
//!     let config = Config::discover_and_load(None)?;
//!     let db = Database::open(&config.storage.path)?;
//!     let controller = CheckpointController::from_config(
//!         &config,
//!         control_plane,
//!         Arc::new(PostgresLiveDatabase::new()),
//!         db,
//!         None,
//!     );
//!     let first = controller.start_or_reset_project("owner-1").await?;
//!     let next = controller.advance_to_next("owner-1", &first.id).await?;
//!     controller.advance_to("owner-1", &first.id).await?;
//!     controller.advance_to_next("owner-1", &first.id).await?;
//!     assert_eq!(next.id, controller.timeline("owner-1", None).await?.checkpoints[1].id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod live;
pub mod maintenance;
pub mod models;
pub mod snapshot;
pub mod steps;
pub mod storage;
pub mod store;

pub use config::{Config, ConfigError};
pub use error::{Result, RewindError};
pub use lifecycle::{CheckpointController, ProjectLocks, Timeline};
pub use live::{AppliedMutation, LiveDatabase, PostgresLiveDatabase, RecordingLiveDatabase};
pub use maintenance::{CleanupFailure, CleanupReport, Maintenance};
pub use models::{Checkpoint, Project};
pub use snapshot::{
    BranchResolver, OperationUpdate, SettlementWaiter, SnapshotOrchestrator, UpdateObserver,
    WaitOptions,
};
pub use steps::{DemoScript, Step, StepMutation};
pub use storage::{Database, StorageError};
pub use store::GraphStore;
