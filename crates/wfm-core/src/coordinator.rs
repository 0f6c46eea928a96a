//! Migration task coordinator
//!
//! Entry point for migrations and for scheme edits that must not interleave
//! with them:
//! - [`prepare`](MigrationCoordinator::prepare) resolves a request into an
//!   immutable [`MigrationContext`]
//! - [`do_quick_migrate`](MigrationCoordinator::do_quick_migrate) finishes
//!   migrations that move no issue without a background task
//! - [`migrate_async`](MigrationCoordinator::migrate_async) validates the
//!   mapping and submits the executor under the scheme lock
//! - scheme edits take their action lock and refuse while a migration of the
//!   scheme is live

use crate::config::MigrationConfig;
use crate::context::{AssignableMigration, DraftMigration, MigrationContext, MigrationRequest};
use crate::error::MigrationError;
use crate::executor::{complete_migration, MigrationExecutor, MigrationResult};
use crate::issues::{IssueSearch, IssueStore};
use crate::mapping::{MappingBuilder, StatusMapping};
use crate::polling::{self, TaskLookup};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use wfm_scheme::{
    AssignableWorkflowScheme, DraftWorkflowScheme, ProjectId, SchemeAction, SchemeError, SchemeId, SchemeLockService,
    SchemeRepository,
};
use wfm_tasks::{ContextKind, TaskDescriptor, TaskError, TaskManager};

/// Descriptor of a migration task
pub type MigrationTask = TaskDescriptor<MigrationResult>;

/// What [`MigrationCoordinator::migrate`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Old and new scheme are the same
    NothingToDo,
    /// No issue had to move; the scheme change was applied directly
    Completed,
    /// A background migration was submitted
    Submitted(MigrationTask),
    /// A migration overlapping this one is still live; nothing was submitted
    AlreadyRunning(MigrationTask),
}

impl MigrationOutcome {
    /// Task to poll, if any
    #[must_use]
    pub fn task(&self) -> Option<&MigrationTask> {
        match self {
            Self::Submitted(task) | Self::AlreadyRunning(task) => Some(task),
            Self::NothingToDo | Self::Completed => None,
        }
    }
}

/// Coordinates migrations and guarded scheme edits
#[derive(Clone)]
pub struct MigrationCoordinator {
    repository: Arc<dyn SchemeRepository>,
    locks: Arc<SchemeLockService>,
    tasks: TaskManager<MigrationResult>,
    search: Arc<dyn IssueSearch>,
    executor: MigrationExecutor,
    config: MigrationConfig,
}

impl std::fmt::Debug for MigrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("repository", &self.repository)
            .field("tasks", &self.tasks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MigrationCoordinator {
    /// Create a coordinator with its own lock service and task manager
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        repository: Arc<dyn SchemeRepository>,
        search: Arc<dyn IssueSearch>,
        store: Arc<dyn IssueStore>,
        config: MigrationConfig,
    ) -> Self {
        let tasks = TaskManager::new(config.pool_config());
        Self::with_parts(repository, Arc::new(SchemeLockService::new()), tasks, search, store, config)
    }

    /// Create a coordinator sharing an existing lock service and task manager
    #[must_use]
    pub fn with_parts(
        repository: Arc<dyn SchemeRepository>,
        locks: Arc<SchemeLockService>,
        tasks: TaskManager<MigrationResult>,
        search: Arc<dyn IssueSearch>,
        store: Arc<dyn IssueStore>,
        config: MigrationConfig,
    ) -> Self {
        let executor = MigrationExecutor::new(Arc::clone(&repository), Arc::clone(&search), store, config.clone());
        Self {
            repository,
            locks,
            tasks,
            search,
            executor,
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn SchemeRepository> {
        &self.repository
    }

    #[inline]
    #[must_use]
    pub fn locks(&self) -> &Arc<SchemeLockService> {
        &self.locks
    }

    #[inline]
    #[must_use]
    pub fn tasks(&self) -> &TaskManager<MigrationResult> {
        &self.tasks
    }

    #[inline]
    #[must_use]
    pub fn search(&self) -> &Arc<dyn IssueSearch> {
        &self.search
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Mapping builder over `context` and this repository's workflows
    #[must_use]
    pub fn mapping_builder<'a>(&'a self, context: &'a MigrationContext) -> MappingBuilder<'a> {
        MappingBuilder::new(context, self.repository.workflows())
    }

    /// Resolve a request into an immutable migration context
    ///
    /// # Errors
    /// - `Scheme` for unknown schemes, drafts or projects
    /// - `InvalidRequest` for an empty project list or projects on different schemes
    pub fn prepare(&self, request: &MigrationRequest) -> Result<MigrationContext, MigrationError> {
        match request {
            MigrationRequest::Projects { projects, target } => {
                let ids: BTreeSet<ProjectId> = projects.iter().copied().collect();
                if ids.is_empty() {
                    return Err(MigrationError::InvalidRequest("no projects selected".into()));
                }
                let target = self.repository.scheme(*target)?;
                let projects = ids
                    .iter()
                    .map(|id| self.repository.project(*id))
                    .collect::<Result<Vec<_>, _>>()?;

                let sources: BTreeSet<SchemeId> = projects.iter().map(|p| p.effective_scheme()).collect();
                let mut sources = sources.into_iter();
                let (Some(source), None) = (sources.next(), sources.next()) else {
                    return Err(MigrationError::InvalidRequest(
                        "selected projects use different workflow schemes".into(),
                    ));
                };
                let source = self.repository.scheme(source)?;

                Ok(MigrationContext::Assignable(AssignableMigration {
                    projects,
                    source,
                    target,
                }))
            }
            MigrationRequest::Draft { draft } => {
                let draft = self.repository.draft(*draft)?;
                let parent = self.repository.scheme(draft.parent_id)?;
                let projects = self.repository.projects_using(parent.id);
                Ok(MigrationContext::Draft(DraftMigration {
                    draft,
                    parent,
                    projects,
                }))
            }
        }
    }

    /// Run `task` holding every action lock of `scheme`
    ///
    /// `None` and the default scheme are never locked. The locks are released
    /// on every exit path of `task`.
    pub async fn wait_for_updates_to_finish_and_execute<F, T>(&self, scheme: Option<SchemeId>, task: F) -> T
    where
        F: Future<Output = T>,
    {
        match scheme.filter(|id| !id.is_default()) {
            Some(id) => self.locks.with_all_locks(id, task).await,
            None => task.await,
        }
    }

    /// Live migration overlapping `context` (same scheme or a shared project)
    #[must_use]
    pub fn active_task(&self, context: &MigrationContext) -> Option<MigrationTask> {
        let wanted = context.task_context();
        self.tasks.find_first_live(|c| c.overlaps(&wanted))
    }

    /// Live migration holding `scheme`
    #[must_use]
    pub fn active_task_for_scheme(&self, scheme: SchemeId) -> Option<MigrationTask> {
        self.tasks.find_first_live(|c| c.touches_scheme(scheme))
    }

    /// Finish the migration synchronously if it moves no issue
    ///
    /// Returns `true` when nothing is left to do: either the context is a
    /// no-op (no lock taken, no search made) or no issue is affected and the
    /// scheme change has been applied. Returns `false` when a background
    /// migration is needed, including while an overlapping one is live.
    ///
    /// # Errors
    /// Search and repository failures.
    pub async fn do_quick_migrate(&self, context: &MigrationContext) -> Result<bool, MigrationError> {
        if context.is_no_op() {
            return Ok(true);
        }
        self.wait_for_updates_to_finish_and_execute(context.lock_scheme(), async {
            if self.active_task(context).is_some() {
                return Ok(false);
            }
            if self.mapping_builder(context).have_issues_to_migrate(self.search.as_ref()).await? {
                return Ok(false);
            }
            complete_migration(self.repository.as_ref(), context)?;
            tracing::info!(migration = %context.describe(), "no issues affected, completed without migration");
            Ok::<_, MigrationError>(true)
        })
        .await
    }

    /// Validate `mapping` and submit the migration to the task manager
    ///
    /// # Errors
    /// - `Validation` if the mapping is incomplete (nothing is locked or submitted)
    /// - `Rejected` if the worker queue is full
    pub async fn migrate_async(
        &self,
        context: MigrationContext,
        mapping: StatusMapping,
    ) -> Result<MigrationOutcome, MigrationError> {
        self.mapping_builder(&context).validate(&mapping)?;

        let lock = context.lock_scheme();
        self.wait_for_updates_to_finish_and_execute(lock, async move {
            if let Some(active) = self.active_task(&context) {
                tracing::info!(task = %active.id, "migration already running for this scheme");
                return Ok(MigrationOutcome::AlreadyRunning(active));
            }

            let description = context.describe();
            let task_context = context.task_context();
            let executor = self.executor.clone();
            let submitted = self.tasks.submit(description, task_context, move |progress| async move {
                executor.run(&context, &mapping, &progress).await
            });

            match submitted {
                Ok(task) => Ok(MigrationOutcome::Submitted(task)),
                Err(TaskError::AlreadyExecuting { task }) => self
                    .tasks
                    .task(task)
                    .map(MigrationOutcome::AlreadyRunning)
                    .ok_or(MigrationError::Task(TaskError::TaskNotFound(task))),
                Err(err) => {
                    tracing::warn!(error = %err, "could not submit migration");
                    Err(err.into())
                }
            }
        })
        .await
    }

    /// Full migration flow: nothing to do, quick migrate, or background task
    ///
    /// # Errors
    /// As [`do_quick_migrate`](Self::do_quick_migrate) and
    /// [`migrate_async`](Self::migrate_async).
    pub async fn migrate(
        &self,
        context: MigrationContext,
        mapping: StatusMapping,
    ) -> Result<MigrationOutcome, MigrationError> {
        if context.is_no_op() {
            return Ok(MigrationOutcome::NothingToDo);
        }
        if self.do_quick_migrate(&context).await? {
            return Ok(MigrationOutcome::Completed);
        }
        self.migrate_async(context, mapping).await
    }

    /// Poll a migration task of `expected` kind
    ///
    /// # Errors
    /// `WrongTaskContext` if an id lookup finds a task of another kind.
    pub fn current_task(&self, expected: ContextKind, lookup: &TaskLookup) -> Result<Option<MigrationTask>, MigrationError> {
        polling::current_task(&self.tasks, expected, lookup)
    }

    fn ensure_not_migrating(&self, scheme: SchemeId) -> Result<(), SchemeError> {
        match self.active_task_for_scheme(scheme) {
            Some(task) => {
                tracing::debug!(scheme = %scheme, task = %task.id, "refusing edit of scheme being migrated");
                Err(SchemeError::BeingMigrated(scheme))
            }
            None => Ok(()),
        }
    }

    /// Update an assignable scheme unless it is being migrated
    ///
    /// # Errors
    /// `BeingMigrated` while a migration task holds the scheme, otherwise
    /// repository errors.
    pub async fn update_scheme(&self, scheme: &AssignableWorkflowScheme) -> Result<AssignableWorkflowScheme, MigrationError> {
        let _guard = self.locks.lock(SchemeAction::UpdateScheme, scheme.id).await;
        self.ensure_not_migrating(scheme.id)?;
        Ok(self.repository.update_scheme(scheme)?)
    }

    /// Delete an assignable scheme unless it is being migrated
    ///
    /// # Errors
    /// As [`update_scheme`](Self::update_scheme).
    pub async fn delete_scheme(&self, id: SchemeId) -> Result<(), MigrationError> {
        let _guard = self.locks.lock(SchemeAction::DeleteScheme, id).await;
        self.ensure_not_migrating(id)?;
        Ok(self.repository.delete_scheme(id)?)
    }

    /// Update a draft unless its parent is being migrated
    ///
    /// # Errors
    /// As [`update_scheme`](Self::update_scheme).
    pub async fn update_draft(
        &self,
        draft: &DraftWorkflowScheme,
        author: Option<&str>,
    ) -> Result<DraftWorkflowScheme, MigrationError> {
        let _guard = self.locks.lock(SchemeAction::UpdateDraftScheme, draft.parent_id).await;
        self.ensure_not_migrating(draft.parent_id)?;
        Ok(self.repository.update_draft(draft, author)?)
    }

    /// Delete a draft unless its parent is being migrated
    ///
    /// # Errors
    /// As [`update_scheme`](Self::update_scheme).
    pub async fn delete_draft(&self, id: SchemeId) -> Result<(), MigrationError> {
        let parent = self.repository.draft(id)?.parent_id;
        let _guard = self.locks.lock(SchemeAction::UpdateDraftScheme, parent).await;
        self.ensure_not_migrating(parent)?;
        Ok(self.repository.delete_draft(id)?)
    }

    /// Stop accepting migrations and wait for running ones
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::issues::{InMemoryIssueStore, IssueQuery, PageRequest};
    use async_trait::async_trait;
    use mockall::mock;
    use wfm_scheme::{InMemorySchemeRepository, IssueId, Project, Workflow, WorkflowMappings};

    mock! {
        Search {}

        #[async_trait]
        impl IssueSearch for Search {
            async fn count_issues(&self, query: &IssueQuery) -> Result<u64, SearchError>;
            async fn issue_ids(&self, query: &IssueQuery, page: PageRequest) -> Result<Vec<IssueId>, SearchError>;
        }
    }

    fn repository() -> Arc<InMemorySchemeRepository> {
        let repo = InMemorySchemeRepository::new();
        repo.workflows().register(Workflow::new("W1", ["Open", "Fixed"]));
        repo.workflows().register(Workflow::new("W2", ["Open", "Done"]));
        Arc::new(repo)
    }

    fn coordinator(repo: Arc<InMemorySchemeRepository>, search: Arc<dyn IssueSearch>) -> MigrationCoordinator {
        MigrationCoordinator::new(
            repo,
            search,
            Arc::new(InMemoryIssueStore::new()),
            MigrationConfig::new().with_workers(1),
        )
    }

    #[tokio::test]
    async fn no_op_never_locks_or_searches() {
        let repo = repository();
        let scheme = repo
            .create_scheme("S", None, WorkflowMappings::new().with_mapping("Bug", "W1"))
            .unwrap();
        repo.add_project(Project::new(ProjectId(1), "P", "P").with_issue_types(["Bug"]).with_scheme(scheme.id))
            .unwrap();

        let mut search = MockSearch::new();
        search.expect_count_issues().never();
        search.expect_issue_ids().never();
        let coordinator = coordinator(repo, Arc::new(search));

        let ctx = coordinator
            .prepare(&MigrationRequest::projects([ProjectId(1)], scheme.id))
            .unwrap();
        assert!(coordinator.mapping_builder(&ctx).do_nothing());

        // hold the scheme lock: a no-op must not wait for it
        let _held = coordinator.locks().lock_all(scheme.id).await;
        assert!(coordinator.do_quick_migrate(&ctx).await.unwrap());
        assert_eq!(
            coordinator.migrate(ctx, StatusMapping::new()).await.unwrap(),
            MigrationOutcome::NothingToDo
        );
        assert!(coordinator.tasks().all_tasks().is_empty());
    }

    #[tokio::test]
    async fn search_failure_surfaces_from_quick_migrate() {
        let repo = repository();
        let target = repo
            .create_scheme("S", None, WorkflowMappings::new().with_mapping("Bug", "W2"))
            .unwrap();
        repo.add_project(Project::new(ProjectId(1), "P", "P").with_issue_types(["Bug"]))
            .unwrap();

        let mut search = MockSearch::new();
        search
            .expect_count_issues()
            .times(1)
            .returning(|_| Err(SearchError::Unavailable("index rebuilding".into())));
        let coordinator = coordinator(repo, Arc::new(search));

        let ctx = coordinator
            .prepare(&MigrationRequest::projects([ProjectId(1)], target.id))
            .unwrap();
        let err = coordinator.do_quick_migrate(&ctx).await.unwrap_err();
        assert!(matches!(err, MigrationError::Search(SearchError::Unavailable(_))));

        // the failed attempt released the lock
        assert!(coordinator.locks().try_lock_all(target.id).is_some());
    }

    #[tokio::test]
    async fn prepare_rejects_mixed_sources_and_unknown_ids() {
        let repo = repository();
        let a = repo.create_scheme("A", None, WorkflowMappings::new()).unwrap();
        let b = repo.create_scheme("B", None, WorkflowMappings::new()).unwrap();
        repo.add_project(Project::new(ProjectId(1), "ONE", "One").with_scheme(a.id)).unwrap();
        repo.add_project(Project::new(ProjectId(2), "TWO", "Two")).unwrap();
        let coordinator = coordinator(repo, Arc::new(InMemoryIssueStore::new()));

        let mixed = coordinator.prepare(&MigrationRequest::projects([ProjectId(1), ProjectId(2)], b.id));
        assert!(matches!(mixed, Err(MigrationError::InvalidRequest(_))));

        let empty = coordinator.prepare(&MigrationRequest::projects([], b.id));
        assert!(matches!(empty, Err(MigrationError::InvalidRequest(_))));

        let unknown = coordinator.prepare(&MigrationRequest::projects([ProjectId(9)], b.id));
        assert!(matches!(
            unknown,
            Err(MigrationError::Scheme(SchemeError::ProjectNotFound(ProjectId(9))))
        ));

        let no_draft = coordinator.prepare(&MigrationRequest::draft(SchemeId(99)));
        assert!(matches!(no_draft, Err(MigrationError::Scheme(SchemeError::DraftNotFound(_)))));
    }
}
