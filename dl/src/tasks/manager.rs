//! TaskManager - runs blocking work on the tokio blocking pool
//!
//! The TaskManager is responsible for:
//! - Running submitted work without blocking the submitter
//! - Limiting concurrency via semaphore
//! - Cooperative cancellation through per-task child tokens
//! - Bounded graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{TaskError, TaskHandle, TaskOutcome, TaskStatus, panic_message};
use crate::config::TasksConfig;

/// Runs work off the caller's execution path
#[derive(Debug)]
pub struct TaskManager {
    /// Concurrency limiter
    semaphore: Arc<Semaphore>,

    /// Tracks every spawned task; closed on shutdown
    tracker: TaskTracker,

    /// Parent of every task token
    root: CancellationToken,
}

impl TaskManager {
    /// Create a manager running at most `max_concurrent` tasks at once
    pub fn new(max_concurrent: usize) -> Self {
        debug!(max_concurrent, "TaskManager::new: called");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            root: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &TasksConfig) -> Self {
        Self::new(config.max_concurrent)
    }

    /// Schedule `work` and return immediately
    ///
    /// `work` receives the task's cancellation token and should check it at
    /// its safe points, returning [`TaskError::Cancelled`] when set.
    pub fn submit<T, F>(&self, name: impl Into<String>, work: F) -> Result<TaskHandle<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, TaskError> + Send + 'static,
    {
        let name = name.into();
        if self.tracker.is_closed() {
            debug!(%name, "submit: rejected, shutting down");
            return Err(TaskError::ShuttingDown);
        }

        let id = Uuid::now_v7();
        let token = self.root.child_token();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        debug!(%id, %name, "submit: spawning task");

        let semaphore = self.semaphore.clone();
        let task_token = token.clone();
        let task_name = name.clone();
        self.tracker.spawn(async move {
            let outcome = run_task(&task_name, semaphore, task_token, &status_tx, work).await;
            debug!(%id, name = %task_name, status = ?outcome.status(), "task finished");
            let _ = status_tx.send(outcome.status());
            let _ = outcome_tx.send(outcome);
        });

        Ok(TaskHandle::new(id, name, token, status_rx, outcome_rx))
    }

    /// Number of tasks not yet finished
    pub fn active_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting work, cancel everything, wait up to `timeout`
    ///
    /// Returns true when every task finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        debug!(?timeout, active = self.tracker.len(), "shutdown: called");
        info!("Shutting down TaskManager with {} active tasks", self.tracker.len());
        self.tracker.close();
        self.root.cancel();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                debug!("shutdown: all tasks completed gracefully");
                true
            }
            Err(_) => {
                warn!(remaining = self.tracker.len(), "Tasks still running after shutdown timeout");
                false
            }
        }
    }
}

async fn run_task<T, F>(
    name: &str,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    status_tx: &watch::Sender<TaskStatus>,
    work: F,
) -> TaskOutcome<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T, TaskError> + Send + 'static,
{
    let _permit = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(%name, "run_task: cancelled before start");
            return TaskOutcome::Cancelled;
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::Cancelled,
        },
    };
    if token.is_cancelled() {
        debug!(%name, "run_task: cancelled while waiting for a slot");
        return TaskOutcome::Cancelled;
    }

    let _ = status_tx.send(TaskStatus::Running);
    let work_token = token.clone();
    match tokio::task::spawn_blocking(move || work(work_token)).await {
        Ok(Ok(_)) if token.is_cancelled() => {
            debug!(%name, "run_task: discarding result of cancelled task");
            TaskOutcome::Cancelled
        }
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(TaskError::Cancelled)) => TaskOutcome::Cancelled,
        Ok(Err(e)) => {
            warn!(%name, error = %e, "Task failed");
            TaskOutcome::Failed(e.to_string())
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic().as_ref());
            warn!(%name, panic = %message, "Task panicked");
            TaskOutcome::Failed(message)
        }
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}
