//! Snapshot workflow: operation settlement, snapshot create/restore, and
//! restore-target branch resolution.

pub mod branch;
pub mod orchestrator;
pub mod waiter;

pub use branch::BranchResolver;
pub use orchestrator::{SnapshotOrchestrator, restored_branch_name};
pub use waiter::{OperationUpdate, SettlementWaiter, UpdateObserver, WaitOptions};
