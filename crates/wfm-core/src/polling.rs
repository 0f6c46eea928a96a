//! Task state polling
//!
//! A poll request either names a task id (checked against the expected
//! migration kind) or asks for whatever live task is bound to a context.

use crate::coordinator::MigrationTask;
use crate::error::MigrationError;
use crate::executor::MigrationResult;
use std::collections::BTreeMap;
use wfm_scheme::IssueId;
use wfm_tasks::{ContextKind, TaskContext, TaskError, TaskId, TaskManager, TaskOutcome};

/// How to find the task being polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLookup {
    /// A task id handed out at submission
    Id(TaskId),
    /// Best effort: the live task registered under this context
    Context(TaskContext),
}

/// Whether the task's result is populated
#[inline]
#[must_use]
pub fn is_done(task: &MigrationTask) -> bool {
    task.is_finished()
}

/// Find the task to poll
///
/// # Errors
/// - `WrongTaskContext` if the id names a task of another kind
/// - `Task(TaskNotFound)` if the id is unknown or its result has expired
pub fn current_task(
    tasks: &TaskManager<MigrationResult>,
    expected: ContextKind,
    lookup: &TaskLookup,
) -> Result<Option<MigrationTask>, MigrationError> {
    match lookup {
        TaskLookup::Id(id) => {
            let task = tasks
                .task(*id)
                .ok_or(MigrationError::Task(TaskError::TaskNotFound(*id)))?;
            let found = task.context.kind();
            if found != expected {
                return Err(MigrationError::WrongTaskContext { expected, found });
            }
            Ok(Some(task))
        }
        TaskLookup::Context(context) => Ok(tasks.live_task(context)),
    }
}

/// Migration result; a panicked task reads as an aborted migration
#[must_use]
pub fn result(task: &MigrationTask) -> Option<MigrationResult> {
    match task.outcome.as_ref()? {
        TaskOutcome::Completed(result) => Some(result.clone()),
        TaskOutcome::Panicked(message) => Some(MigrationResult::aborted(vec![format!(
            "migration task failed unexpectedly: {message}"
        )])),
    }
}

/// Issues that failed, empty until the task finishes
#[must_use]
pub fn failed_issues(task: &MigrationTask) -> BTreeMap<IssueId, String> {
    result(task).map(|r| r.failed_issues).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use wfm_scheme::{ProjectId, SchemeId};
    use wfm_tasks::PoolConfig;

    fn manager() -> TaskManager<MigrationResult> {
        TaskManager::new(PoolConfig {
            workers: 1,
            queue_capacity: 4,
            retention: Duration::from_secs(60),
        })
    }

    fn draft_context() -> TaskContext {
        TaskContext::DraftMigration {
            parent: SchemeId(3),
            projects: BTreeSet::from([ProjectId(1)]),
        }
    }

    #[tokio::test]
    async fn id_lookup_checks_context_kind() {
        let tasks = manager();
        let task = tasks
            .submit("draft", draft_context(), |_| async { MigrationResult::success() })
            .unwrap();
        tasks.wait_for(task.id).await.unwrap();

        let found = current_task(&tasks, ContextKind::DraftMigration, &TaskLookup::Id(task.id))
            .unwrap()
            .unwrap();
        assert!(is_done(&found));
        assert_eq!(result(&found), Some(MigrationResult::success()));
        assert!(failed_issues(&found).is_empty());

        let err = current_task(&tasks, ContextKind::ProjectMigration, &TaskLookup::Id(task.id)).unwrap_err();
        assert!(err.is_programmer_error());

        let unknown = current_task(&tasks, ContextKind::DraftMigration, &TaskLookup::Id(TaskId::new()));
        assert!(matches!(unknown, Err(MigrationError::Task(TaskError::TaskNotFound(_)))));
    }

    #[tokio::test]
    async fn context_lookup_only_finds_live_tasks() {
        let tasks = manager();
        let lookup = TaskLookup::Context(draft_context());
        assert_eq!(current_task(&tasks, ContextKind::DraftMigration, &lookup).unwrap(), None);

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let task = tasks
            .submit("draft", draft_context(), move |_| async move {
                let _ = gate.await;
                MigrationResult::success()
            })
            .unwrap();

        let live = current_task(&tasks, ContextKind::DraftMigration, &lookup).unwrap().unwrap();
        assert_eq!(live.id, task.id);
        assert!(!is_done(&live));
        assert_eq!(result(&live), None);

        release.send(()).unwrap();
        tasks.wait_for(task.id).await.unwrap();
        assert_eq!(current_task(&tasks, ContextKind::DraftMigration, &lookup).unwrap(), None);
    }
}
