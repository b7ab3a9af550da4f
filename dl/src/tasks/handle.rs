//! TaskHandle - caller's view of a submitted task

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{TaskOutcome, TaskStatus};

/// Handle to a submitted task
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    id: Uuid,
    name: String,
    token: CancellationToken,
    status_rx: watch::Receiver<TaskStatus>,
    outcome_rx: Option<oneshot::Receiver<TaskOutcome<T>>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: Uuid,
        name: String,
        token: CancellationToken,
        status_rx: watch::Receiver<TaskStatus>,
        outcome_rx: oneshot::Receiver<TaskOutcome<T>>,
    ) -> Self {
        Self {
            id,
            name,
            token,
            status_rx,
            outcome_rx: Some(outcome_rx),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most recent status
    pub fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    /// Request cancellation
    ///
    /// A task that has not started yet never starts. A running task observes
    /// the request at its own safe points; whatever it returns afterwards is
    /// reported as cancelled.
    pub fn cancel(&self) {
        debug!(id = %self.id, name = %self.name, "TaskHandle::cancel: called");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the task has started or ended
    pub async fn started(&mut self) {
        let _ = self.status_rx.wait_for(|s| *s != TaskStatus::Pending).await;
    }

    /// Wait for the task's outcome
    ///
    /// Cancel safe: dropping the future before it resolves keeps the outcome
    /// available for the next call. After the outcome has been delivered,
    /// further calls report a failure.
    pub async fn outcome(&mut self) -> TaskOutcome<T> {
        let Some(rx) = self.outcome_rx.as_mut() else {
            return TaskOutcome::Failed("outcome already taken".to_string());
        };
        let outcome = rx
            .await
            .unwrap_or_else(|_| TaskOutcome::Failed("task ended without reporting an outcome".to_string()));
        self.outcome_rx = None;
        debug!(id = %self.id, name = %self.name, status = ?outcome.status(), "TaskHandle::outcome: delivered");
        outcome
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
