//! Operation settlement.
//!
//! Control-plane requests enqueue asynchronous operations. The waiter polls
//! each operation until it reaches a terminal status or its timeout elapses.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use rewind_abstraction::{ControlPlane, OperationStatus};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SettlementConfig;
use crate::error::{Result, RewindError};

/// A single status observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationUpdate {
    /// Operation that was polled.
    pub operation_id: String,
    /// Status it reported.
    pub status: OperationStatus,
}

/// Callback invoked on every status observation.
pub type UpdateObserver = Arc<dyn Fn(&OperationUpdate) + Send + Sync>;

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Per-operation timeout.
    pub timeout: Duration,
    /// Treat `failed` as fatal instead of polling on.
    pub fail_fast_on_failed: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from(&SettlementConfig::default())
    }
}

impl From<&SettlementConfig> for WaitOptions {
    fn from(config: &SettlementConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            fail_fast_on_failed: config.fail_fast_on_failed,
        }
    }
}

/// Waits for control-plane operations to settle.
#[derive(Clone)]
pub struct SettlementWaiter {
    control_plane: Arc<dyn ControlPlane>,
    options: WaitOptions,
    observer: Option<UpdateObserver>,
}

impl fmt::Debug for SettlementWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementWaiter")
            .field("options", &self.options)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl SettlementWaiter {
    /// Creates a waiter.
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: WaitOptions) -> Self {
        Self { control_plane, options, observer: None }
    }

    /// Sets the observer called on every status observation.
    #[must_use]
    pub fn with_observer(mut self, observer: UpdateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the polling parameters.
    pub const fn options(&self) -> WaitOptions {
        self.options
    }

    /// Polls one operation until it settles.
    ///
    /// # Errors
    /// Fails on the first status fetch error, on timeout, and on `failed`
    /// when fail-fast is enabled.
    pub async fn wait_for_operation(
        &self,
        project_ref: &str,
        operation_id: &str,
    ) -> Result<OperationStatus> {
        poll_until_settled(
            self.control_plane.as_ref(),
            project_ref,
            operation_id,
            self.options,
            self.observer.as_ref(),
        )
        .await
    }

    /// Polls every operation concurrently until all settle.
    ///
    /// Each id is polled on its own task. The first failure is returned
    /// immediately; the remaining tasks keep polling to settlement or timeout
    /// and their results are discarded.
    ///
    /// # Errors
    /// Returns the first error any operation produces.
    pub async fn wait_for_all(
        &self,
        project_ref: &str,
        operation_ids: &[String],
    ) -> Result<BTreeMap<String, OperationStatus>> {
        let mut settled = BTreeMap::new();
        if operation_ids.is_empty() {
            return Ok(settled);
        }

        let mut pending: FuturesUnordered<_> = operation_ids
            .iter()
            .map(|operation_id| {
                let control_plane = Arc::clone(&self.control_plane);
                let observer = self.observer.clone();
                let project_ref = project_ref.to_string();
                let operation_id = operation_id.clone();
                let options = self.options;
                tokio::spawn(async move {
                    let status = poll_until_settled(
                        control_plane.as_ref(),
                        &project_ref,
                        &operation_id,
                        options,
                        observer.as_ref(),
                    )
                    .await?;
                    Ok::<_, RewindError>((operation_id, status))
                })
            })
            .collect();

        while let Some(joined) = pending.next().await {
            let (operation_id, status) = match joined {
                Ok(result) => result?,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    return Err(RewindError::Io(std::io::Error::other(format!(
                        "operation poller stopped: {e}"
                    ))));
                }
            };
            settled.insert(operation_id, status);
        }

        debug!(project_ref = %project_ref, count = settled.len(), "All operations settled");
        Ok(settled)
    }
}

async fn poll_until_settled(
    control_plane: &dyn ControlPlane,
    project_ref: &str,
    operation_id: &str,
    options: WaitOptions,
    observer: Option<&UpdateObserver>,
) -> Result<OperationStatus> {
    let start = Instant::now();

    loop {
        let status = control_plane.get_operation_status(project_ref, operation_id).await?;
        debug!(operation_id = %operation_id, status = %status, "Polled operation");

        if let Some(observer) = observer {
            observer(&OperationUpdate { operation_id: operation_id.to_string(), status });
        }

        if status.is_terminal() {
            return Ok(status);
        }

        if options.fail_fast_on_failed && status == OperationStatus::Failed {
            warn!(operation_id = %operation_id, "Operation failed");
            return Err(RewindError::OperationFailed { operation_id: operation_id.to_string() });
        }

        if start.elapsed() > options.timeout {
            warn!(
                operation_id = %operation_id,
                last_status = %status,
                timeout_secs = options.timeout.as_secs(),
                "Timed out waiting for operation to settle"
            );
            return Err(RewindError::SettlementTimeout {
                operation_id: operation_id.to_string(),
                last_status: status,
                timeout: options.timeout,
            });
        }

        tokio::time::sleep(options.poll_interval).await;
    }
}
