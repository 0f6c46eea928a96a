//! Issue search and storage seams
//!
//! Migration never loads every issue at once: ids are enumerated page by
//! page through [`IssueSearch`] and each issue is read and updated on its
//! own through [`IssueStore`].

use crate::error::{SearchError, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use wfm_scheme::{Issue, IssueId, IssueTypeId, ProjectId, StatusId};

/// Issues of some projects, optionally restricted to some issue types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueQuery {
    pub projects: BTreeSet<ProjectId>,
    /// `None` matches every issue type
    pub issue_types: Option<BTreeSet<IssueTypeId>>,
}

impl IssueQuery {
    #[must_use]
    pub fn for_projects(projects: impl IntoIterator<Item = ProjectId>) -> Self {
        Self {
            projects: projects.into_iter().collect(),
            issue_types: None,
        }
    }

    #[must_use]
    pub fn with_issue_types(mut self, types: impl IntoIterator<Item = IssueTypeId>) -> Self {
        self.issue_types = Some(types.into_iter().collect());
        self
    }

    /// Whether the query can match nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() || self.issue_types.as_ref().is_some_and(BTreeSet::is_empty)
    }

    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        self.projects.contains(&issue.project)
            && self
                .issue_types
                .as_ref()
                .map_or(true, |types| types.contains(&issue.issue_type))
    }
}

/// Keyset page: ids strictly greater than `after`, ascending, at most `limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<IssueId>,
    pub limit: usize,
}

impl PageRequest {
    #[inline]
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }

    /// Page following one that ended at `last`
    #[inline]
    #[must_use]
    pub fn next(self, last: IssueId) -> Self {
        Self {
            after: Some(last),
            limit: self.limit,
        }
    }
}

/// Read-only issue search
#[async_trait]
pub trait IssueSearch: Send + Sync {
    async fn count_issues(&self, query: &IssueQuery) -> Result<u64, SearchError>;

    /// One page of matching ids in ascending order
    async fn issue_ids(&self, query: &IssueQuery, page: PageRequest) -> Result<Vec<IssueId>, SearchError>;
}

/// Issue persistence used by the executor
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Current state of an issue; `None` once deleted
    async fn issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError>;

    /// Move an issue onto `workflow` with `status`, committed on its own
    async fn migrate_issue(&self, id: IssueId, workflow: &str, status: &StatusId) -> Result<Issue, StoreError>;
}

/// In-memory issue table implementing both seams
#[derive(Debug, Default)]
pub struct InMemoryIssueStore {
    issues: RwLock<BTreeMap<IssueId, Issue>>,
}

impl InMemoryIssueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        let store = Self::new();
        for issue in issues {
            store.insert(issue);
        }
        store
    }

    pub fn insert(&self, issue: Issue) {
        self.issues.write().insert(issue.id, issue);
    }

    pub fn remove(&self, id: IssueId) -> Option<Issue> {
        self.issues.write().remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: IssueId) -> Option<Issue> {
        self.issues.read().get(&id).cloned()
    }

    /// Every issue, in id order
    #[must_use]
    pub fn issues(&self) -> Vec<Issue> {
        self.issues.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.read().is_empty()
    }
}

#[async_trait]
impl IssueSearch for InMemoryIssueStore {
    async fn count_issues(&self, query: &IssueQuery) -> Result<u64, SearchError> {
        let issues = self.issues.read();
        Ok(issues.values().filter(|issue| query.matches(issue)).count() as u64)
    }

    async fn issue_ids(&self, query: &IssueQuery, page: PageRequest) -> Result<Vec<IssueId>, SearchError> {
        if page.limit == 0 {
            return Err(SearchError::InvalidQuery("page limit must be positive".into()));
        }
        let issues = self.issues.read();
        let range = match page.after {
            Some(after) => issues.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)),
            None => issues.range(..),
        };
        Ok(range
            .filter(|(_, issue)| query.matches(issue))
            .map(|(id, _)| *id)
            .take(page.limit)
            .collect())
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        Ok(self.get(id))
    }

    async fn migrate_issue(&self, id: IssueId, workflow: &str, status: &StatusId) -> Result<Issue, StoreError> {
        let mut issues = self.issues.write();
        let issue = issues.get_mut(&id).ok_or(StoreError::IssueNotFound(id))?;
        workflow.clone_into(&mut issue.workflow);
        issue.status = status.clone();
        Ok(issue.clone())
    }
}
