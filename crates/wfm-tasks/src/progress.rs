//! Progress reporting for background tasks
//!
//! A task reports through a [`ProgressSink`]. [`TaskProgress`] records the
//! latest event on the task descriptor; [`StepSink`] maps "item i of n" onto
//! a slice of the parent's percentage range.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0..=100
    pub percent: u64,
    pub sub_task: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Receiver of progress updates
pub trait ProgressSink: Send + Sync {
    /// Report `progress` (a percentage, or a step index for [`StepSink`])
    fn make_progress(&self, progress: u64, sub_task: Option<&str>, message: &str);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn make_progress(&self, _progress: u64, _sub_task: Option<&str>, _message: &str) {}
}

/// Sink recording the latest event on a task descriptor
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    latest: Arc<RwLock<Option<ProgressEvent>>>,
}

impl TaskProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest recorded event
    #[must_use]
    pub fn latest(&self) -> Option<ProgressEvent> {
        self.latest.read().clone()
    }

    /// Latest percentage, 0 before the first event
    #[must_use]
    pub fn percent(&self) -> u64 {
        self.latest.read().as_ref().map_or(0, |e| e.percent)
    }
}

impl ProgressSink for TaskProgress {
    fn make_progress(&self, progress: u64, sub_task: Option<&str>, message: &str) {
        let percent = progress.min(100);
        let mut latest = self.latest.write();
        // never move backwards
        if latest.as_ref().is_some_and(|e| e.percent > percent) {
            return;
        }
        *latest = Some(ProgressEvent {
            percent,
            sub_task: sub_task.map(str::to_string),
            message: message.to_string(),
            at: Utc::now(),
        });
    }
}

/// View over `[start, start + length]` of a parent sink, divided into `steps`
pub struct StepSink<'a> {
    parent: &'a dyn ProgressSink,
    start: u64,
    length: u64,
    steps: u64,
}

impl<'a> StepSink<'a> {
    #[must_use]
    pub fn new(parent: &'a dyn ProgressSink, start: u64, length: u64, steps: u64) -> Self {
        Self {
            parent,
            start,
            length,
            steps,
        }
    }

    /// Parent percentage for step `step`
    #[must_use]
    pub fn percent_for(&self, step: u64) -> u64 {
        if self.steps == 0 {
            return self.start + self.length;
        }
        let step = step.min(self.steps);
        self.start + self.length * step / self.steps
    }
}

impl ProgressSink for StepSink<'_> {
    fn make_progress(&self, step: u64, sub_task: Option<&str>, message: &str) {
        self.parent
            .make_progress(self.percent_for(step), sub_task, message);
    }
}
