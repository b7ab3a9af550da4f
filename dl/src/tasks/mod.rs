//! Background task execution with cooperative cancellation
//!
//! The [`TaskManager`] runs blocking work off the control path and hands back
//! a [`TaskHandle`] carrying a cancellation token and a completion channel
//! that delivers exactly one [`TaskOutcome`].

mod handle;
mod manager;

use std::any::Any;

use thiserror::Error;

pub use handle::TaskHandle;
pub use manager::TaskManager;

/// Errors returned by task work or by the manager
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task cancelled")]
    Cancelled,

    #[error("Task manager is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Failed(#[from] eyre::Report),
}

/// Lifecycle of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting for a free slot
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed)
    }
}

/// How a task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(String),
}

impl<T> TaskOutcome<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        std::panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn test_panic_message() {
        let payload = payload_of(|| panic!("static message"));
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = payload_of(|| panic!("formatted {}", 42));
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(TaskOutcome::Completed(1).status(), TaskStatus::Completed);
        assert_eq!(TaskOutcome::<()>::Cancelled.status(), TaskStatus::Cancelled);
        assert_eq!(TaskOutcome::<()>::Failed("x".into()).status(), TaskStatus::Failed);
    }
}
