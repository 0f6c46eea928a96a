//! Task descriptors
//!
//! [`TaskState`] is the shared, mutable record a worker updates;
//! [`TaskDescriptor`] is the immutable snapshot handed to callers.

use crate::progress::{ProgressEvent, TaskProgress};
use crate::types::{TaskContext, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum TaskOutcome<R> {
    /// The job returned a value
    Completed(R),
    /// The job panicked; the payload message if it was a string
    Panicked(String),
}

impl<R> TaskOutcome<R> {
    /// Returned value, if the job completed
    #[must_use]
    pub fn completed(&self) -> Option<&R> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Panicked(_) => None,
        }
    }
}

#[derive(Debug)]
struct Timeline<R> {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcome: Option<TaskOutcome<R>>,
}

/// Shared record of one submitted task
#[derive(Debug)]
pub(crate) struct TaskState<R> {
    pub(crate) id: TaskId,
    pub(crate) description: String,
    pub(crate) context: TaskContext,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) progress: TaskProgress,
    timeline: RwLock<Timeline<R>>,
    pub(crate) done: Notify,
}

impl<R: Clone> TaskState<R> {
    pub(crate) fn new(description: String, context: TaskContext) -> Self {
        Self {
            id: TaskId::new(),
            description,
            context,
            submitted_at: Utc::now(),
            progress: TaskProgress::new(),
            timeline: RwLock::new(Timeline {
                started_at: None,
                finished_at: None,
                outcome: None,
            }),
            done: Notify::new(),
        }
    }

    pub(crate) fn mark_started(&self) {
        self.timeline.write().started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&self, outcome: TaskOutcome<R>) {
        {
            let mut timeline = self.timeline.write();
            timeline.finished_at = Some(Utc::now());
            timeline.outcome = Some(outcome);
        }
        self.done.notify_waiters();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.timeline.read().outcome.is_some()
    }

    pub(crate) fn snapshot(&self) -> TaskDescriptor<R> {
        let timeline = self.timeline.read();
        TaskDescriptor {
            id: self.id,
            description: self.description.clone(),
            context: self.context.clone(),
            submitted_at: self.submitted_at,
            started_at: timeline.started_at,
            finished_at: timeline.finished_at,
            progress: self.progress.latest(),
            outcome: timeline.outcome.clone(),
        }
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor<R> {
    pub id: TaskId,
    pub description: String,
    pub context: TaskContext,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Latest progress event, if any was reported
    pub progress: Option<ProgressEvent>,
    /// Set once the task has finished
    pub outcome: Option<TaskOutcome<R>>,
}

impl<R> TaskDescriptor<R> {
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Latest percentage (100 once finished)
    #[must_use]
    pub fn percent(&self) -> u64 {
        if self.is_finished() {
            return 100;
        }
        self.progress.as_ref().map_or(0, |p| p.percent)
    }
}
