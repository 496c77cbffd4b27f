//! Reconciliation item status and result types.

use std::time::Duration;
use thiserror::Error;

/// Outcome of processing a single reconciliation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Item processed
    Success,
    /// Nothing to do for this item (not ours, no eligible resource, ...)
    Skipped,
    /// Item failed; the next relevant event retries it
    Failed,
    /// Item did not finish within the caller-imposed deadline
    TimedOut,
}

impl TaskStatus {
    /// Returns true if the item needs no further attention.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Skipped)
    }

    /// Returns true if the item was abandoned.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::TimedOut)
    }
}

/// Error type for reconciliation item failures.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The item's work returned an error
    #[error("{message}")]
    Failed { message: String },

    /// The item exceeded its deadline
    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The item was deliberately not processed
    #[error("skipped: {reason}")]
    Skipped { reason: String },
}

impl TaskError {
    /// Creates a failure from any displayable error.
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timed_out(after: Duration) -> Self {
        TaskError::TimedOut { after }
    }

    /// Creates a skip marker.
    pub fn skipped(reason: impl Into<String>) -> Self {
        TaskError::Skipped {
            reason: reason.into(),
        }
    }

    /// Converts this error to a TaskStatus.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::Failed { .. } => TaskStatus::Failed,
            TaskError::TimedOut { .. } => TaskStatus::TimedOut,
            TaskError::Skipped { .. } => TaskStatus::Skipped,
        }
    }
}

/// Result type for reconciliation items.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting TaskResult to TaskStatus.
pub trait TaskResultExt {
    /// Converts this result to a TaskStatus.
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}
