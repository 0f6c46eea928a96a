//! Testing utilities for the WFM workspace
//!
//! Shared fixtures and issue store doubles.

#![allow(missing_docs)]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use wfm_core::{
    InMemoryIssueStore, IssueQuery, IssueSearch, IssueStore, MigrationConfig, MigrationCoordinator, PageRequest,
    SearchError, StoreError,
};
use wfm_scheme::{
    AssignableWorkflowScheme, InMemorySchemeRepository, Issue, IssueId, IssueTypeId, Project, ProjectId, SchemeRepository, StatusId,
    Workflow, WorkflowMappings,
};

pub const PROJECT: ProjectId = ProjectId(1);

/// Two schemes that differ only in the workflow of `Bug`:
/// `W1 = [Open, In Progress, Fixed]` and `W2 = [Open, In Progress, Done]`
#[derive(Debug)]
pub struct Fixture {
    pub repo: Arc<InMemorySchemeRepository>,
    pub issues: Arc<InMemoryIssueStore>,
    pub source: AssignableWorkflowScheme,
    pub target: AssignableWorkflowScheme,
}

impl Fixture {
    /// Project `PROJECT` on the source scheme with no issues
    #[must_use]
    pub fn new() -> Self {
        let repo = InMemorySchemeRepository::new();
        repo.workflows().register(Workflow::new("W1", ["Open", "In Progress", "Fixed"]));
        repo.workflows().register(Workflow::new("W2", ["Open", "In Progress", "Done"]));

        let source = repo
            .create_scheme("Old", None, WorkflowMappings::new().with_mapping("Bug", "W1"))
            .expect("source scheme");
        let target = repo
            .create_scheme("New", None, WorkflowMappings::new().with_mapping("Bug", "W2"))
            .expect("target scheme");
        repo.add_project(
            Project::new(PROJECT, "PRJ", "Project")
                .with_issue_types(["Bug", "Task"])
                .with_scheme(source.id),
        )
        .expect("project");

        Self {
            repo: Arc::new(repo),
            issues: Arc::new(InMemoryIssueStore::new()),
            source,
            target,
        }
    }

    /// One Bug in `Fixed` on W1
    #[must_use]
    pub fn bug_in_fixed() -> Self {
        let fixture = Self::new();
        fixture.add_issue(1, "Bug", "Fixed");
        fixture
    }

    /// `count` Bugs in `Fixed`, ids `1..=count`
    #[must_use]
    pub fn with_bugs(count: u64) -> Self {
        let fixture = Self::new();
        for id in 1..=count {
            fixture.add_issue(id, "Bug", "Fixed");
        }
        fixture
    }

    /// Add an issue of `PROJECT` on the workflow the source scheme assigns it
    pub fn add_issue(&self, id: u64, issue_type: &str, status: &str) -> Issue {
        let issue_type: IssueTypeId = issue_type.into();
        let issue = Issue {
            id: IssueId(id),
            key: format!("PRJ-{id}"),
            project: PROJECT,
            workflow: self.source.mappings.actual_workflow(&issue_type).to_string(),
            issue_type,
            status: status.into(),
        };
        self.issues.insert(issue.clone());
        issue
    }

    #[must_use]
    pub fn issue(&self, id: u64) -> Issue {
        self.issues.get(IssueId(id)).expect("issue exists")
    }

    /// Coordinator over the in-memory issue table
    #[must_use]
    pub fn coordinator(&self, config: MigrationConfig) -> MigrationCoordinator {
        self.coordinator_with_store(Arc::clone(&self.issues) as Arc<dyn IssueStore>, config)
    }

    /// Coordinator whose issue updates go through `store`
    #[must_use]
    pub fn coordinator_with_store(&self, store: Arc<dyn IssueStore>, config: MigrationConfig) -> MigrationCoordinator {
        MigrationCoordinator::new(
            Arc::clone(&self.repo) as Arc<dyn SchemeRepository>,
            Arc::clone(&self.issues) as Arc<dyn IssueSearch>,
            store,
            config,
        )
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue store that refuses to update some issues
#[derive(Debug)]
pub struct FailingStore {
    inner: Arc<InMemoryIssueStore>,
    failing: BTreeSet<IssueId>,
}

impl FailingStore {
    #[must_use]
    pub fn new(inner: Arc<InMemoryIssueStore>, failing: impl IntoIterator<Item = u64>) -> Self {
        Self {
            inner,
            failing: failing.into_iter().map(IssueId).collect(),
        }
    }
}

#[async_trait]
impl IssueStore for FailingStore {
    async fn issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        self.inner.issue(id).await
    }

    async fn migrate_issue(&self, id: IssueId, workflow: &str, status: &StatusId) -> Result<Issue, StoreError> {
        if self.failing.contains(&id) {
            return Err(StoreError::Rejected {
                issue: id,
                reason: "simulated write failure".into(),
            });
        }
        self.inner.migrate_issue(id, workflow, status).await
    }
}

/// Issue store whose updates wait until [`open`](GatedStore::open) is called
#[derive(Debug)]
pub struct GatedStore {
    inner: Arc<InMemoryIssueStore>,
    gate: watch::Sender<bool>,
}

impl GatedStore {
    #[must_use]
    pub fn new(inner: Arc<InMemoryIssueStore>) -> Self {
        let (gate, _) = watch::channel(false);
        Self { inner, gate }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl IssueStore for GatedStore {
    async fn issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        self.inner.issue(id).await
    }

    async fn migrate_issue(&self, id: IssueId, workflow: &str, status: &StatusId) -> Result<Issue, StoreError> {
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| StoreError::Unavailable("gate closed".into()))?;
        self.inner.migrate_issue(id, workflow, status).await
    }
}

/// Issue search that is always down
#[derive(Debug, Default)]
pub struct UnavailableSearch;

#[async_trait]
impl IssueSearch for UnavailableSearch {
    async fn count_issues(&self, _query: &IssueQuery) -> Result<u64, SearchError> {
        Err(SearchError::Unavailable("search index offline".into()))
    }

    async fn issue_ids(&self, _query: &IssueQuery, _page: PageRequest) -> Result<Vec<IssueId>, SearchError> {
        Err(SearchError::Unavailable("search index offline".into()))
    }
}
