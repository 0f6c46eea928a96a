//! Task manager errors

use crate::types::TaskId;

/// Errors raised when submitting or looking up tasks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Worker queue is full; the task never started
    #[error("task queue full (capacity: {capacity}), try again later")]
    Rejected { capacity: usize },

    /// A live task already covers an overlapping context
    #[error("a task with an overlapping context is already running: {task}")]
    AlreadyExecuting { task: TaskId },

    /// Unknown (or expired) task id
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Manager has been shut down
    #[error("task manager is shut down")]
    ShutDown,
}

impl TaskError {
    /// Whether retrying later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::AlreadyExecuting { .. })
    }
}
