//! Migration executor
//!
//! Runs one migration on a task worker. Progress is reported in phases:
//!
//! | percent | phase |
//! |---|---|
//! | 0..=5 | find affected issues |
//! | 6..=16 | verify every issue can be mapped |
//! | 17..=22 | find issues again (catches issues created meanwhile) |
//! | 23..=98 | migrate issues |
//! | 99 | associate scheme / publish draft |
//! | 100 | done |
//!
//! A failing issue is recorded and skipped; only verification failures,
//! search failures, the failure threshold or the scheme disappearing abort
//! the whole run.

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::error::SearchError;
use crate::issues::{IssueQuery, IssueSearch, IssueStore, PageRequest};
use crate::mapping::{MappingBuilder, StatusMapping};
use crate::phase::MigrationPhase;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use wfm_scheme::{Issue, IssueId, IssueTypeId, SchemeError, SchemeRepository, StatusId, Workflow};
use wfm_tasks::{ProgressSink, StepSink};

/// Final status of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Success,
    SuccessWithFailures,
    Aborted,
}

impl MigrationStatus {
    /// Terminal phase this status corresponds to
    #[must_use]
    pub fn phase(self) -> MigrationPhase {
        match self {
            Self::Success => MigrationPhase::Success,
            Self::SuccessWithFailures => MigrationPhase::SuccessWithFailures,
            Self::Aborted => MigrationPhase::Aborted,
        }
    }
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub status: MigrationStatus,
    /// Issues that could not be migrated, with the reason
    pub failed_issues: BTreeMap<IssueId, String>,
    /// Errors that aborted the run (distinct from per-issue failures)
    pub errors: Vec<String>,
    /// Issues updated
    pub migrated: u64,
    /// Issues already correct or deleted meanwhile
    pub skipped: u64,
}

impl MigrationResult {
    /// A run that finished without touching any issue
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: MigrationStatus::Success,
            failed_issues: BTreeMap::new(),
            errors: Vec::new(),
            migrated: 0,
            skipped: 0,
        }
    }

    /// A run that aborted before or without migrating anything
    #[must_use]
    pub fn aborted(errors: Vec<String>) -> Self {
        Self {
            status: MigrationStatus::Aborted,
            errors,
            ..Self::success()
        }
    }

    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.status == MigrationStatus::Aborted
    }
}

/// What to do with one issue
#[derive(Debug, Clone, PartialEq, Eq)]
enum IssuePlan {
    Unchanged,
    Migrate { workflow: String, status: StatusId },
    Unmappable { status: StatusId, workflow: String },
}

/// Target workflows resolved once per run
struct Plan<'a> {
    builder: MappingBuilder<'a>,
    mapping: &'a StatusMapping,
    targets: HashMap<IssueTypeId, Workflow>,
}

impl<'a> Plan<'a> {
    fn new(builder: MappingBuilder<'a>, mapping: &'a StatusMapping) -> Self {
        Self {
            builder,
            mapping,
            targets: HashMap::new(),
        }
    }

    fn target(&mut self, issue_type: &IssueTypeId) -> Result<&Workflow, SchemeError> {
        if !self.targets.contains_key(issue_type) {
            let name = self.builder.context().new_mappings().actual_workflow(issue_type);
            let workflow = self.builder.workflows().require(name)?;
            self.targets.insert(issue_type.clone(), workflow);
        }
        self.targets
            .get(issue_type)
            .ok_or_else(|| SchemeError::WorkflowNotFound(issue_type.to_string()))
    }

    fn decide(&mut self, issue: &Issue) -> Result<IssuePlan, SchemeError> {
        let mapping = self.mapping;
        let target = self.target(&issue.issue_type)?;
        let status = if target.has_status(&issue.status) {
            issue.status.clone()
        } else {
            match mapping.target(&issue.issue_type, &issue.status) {
                Some(mapped) if target.has_status(mapped) => mapped.clone(),
                _ => {
                    return Ok(IssuePlan::Unmappable {
                        status: issue.status.clone(),
                        workflow: target.name.clone(),
                    })
                }
            }
        };
        if issue.workflow == target.name && status == issue.status {
            Ok(IssuePlan::Unchanged)
        } else {
            Ok(IssuePlan::Migrate {
                workflow: target.name.clone(),
                status,
            })
        }
    }
}

/// Keyset pager over the ids matching a query
struct Pager<'a> {
    search: &'a dyn IssueSearch,
    query: &'a IssueQuery,
    next: Option<PageRequest>,
}

impl<'a> Pager<'a> {
    fn new(search: &'a dyn IssueSearch, query: &'a IssueQuery, page_size: usize) -> Self {
        let next = (!query.is_empty()).then(|| PageRequest::first(page_size.max(1)));
        Self { search, query, next }
    }

    /// Next non-empty page, `None` once exhausted
    async fn next_page(&mut self) -> Result<Option<Vec<IssueId>>, SearchError> {
        let Some(page) = self.next.take() else {
            return Ok(None);
        };
        let ids = self.search.issue_ids(self.query, page).await?;
        if ids.len() >= page.limit {
            self.next = ids.last().map(|&last| page.next(last));
        }
        Ok((!ids.is_empty()).then_some(ids))
    }
}

/// Runs migrations against the scheme repository and issue seams
#[derive(Clone)]
pub struct MigrationExecutor {
    repository: Arc<dyn SchemeRepository>,
    search: Arc<dyn IssueSearch>,
    store: Arc<dyn IssueStore>,
    config: MigrationConfig,
}

impl std::fmt::Debug for MigrationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationExecutor")
            .field("repository", &self.repository)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MigrationExecutor {
    #[must_use]
    pub fn new(
        repository: Arc<dyn SchemeRepository>,
        search: Arc<dyn IssueSearch>,
        store: Arc<dyn IssueStore>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            repository,
            search,
            store,
            config,
        }
    }

    /// Migrate every affected issue, then associate the scheme or publish the draft
    pub async fn run(
        &self,
        context: &MigrationContext,
        mapping: &StatusMapping,
        progress: &dyn ProgressSink,
    ) -> MigrationResult {
        tracing::info!(migration = %context.describe(), "starting workflow migration");

        if let Err(err) = self.check_still_exists(context) {
            tracing::error!(error = %err, "scheme disappeared before migration started");
            return MigrationResult::aborted(vec![err.to_string()]);
        }

        let builder = MappingBuilder::new(context, self.repository.workflows());
        let query = builder.affected_query();
        let mut plan = Plan::new(builder, mapping);

        progress.make_progress(0, Some("find"), "Finding affected issues");
        let total = match self.count(&query).await {
            Ok(total) => total,
            Err(err) => return abort_on_search(&err),
        };
        progress.make_progress(5, Some("find"), &format!("Found {total} affected issue(s)"));

        let errors = match self.verify(&query, &mut plan, total, progress).await {
            Ok(errors) => errors,
            Err(err) => return abort_on_search(&err),
        };
        if !errors.is_empty() {
            tracing::error!(count = errors.len(), "issues cannot be mapped, aborting migration");
            return MigrationResult::aborted(errors);
        }

        progress.make_progress(17, Some("refind"), "Finding issues created meanwhile");
        let total = match self.count(&query).await {
            Ok(total) => total,
            Err(err) => return abort_on_search(&err),
        };
        progress.make_progress(22, Some("refind"), &format!("Migrating {total} issue(s)"));

        let mut result = MigrationResult::success();
        if let Err(err) = self.migrate_all(&query, &mut plan, total, progress, &mut result).await {
            tracing::error!(error = %err, "issue search failed during migration");
            result.status = MigrationStatus::Aborted;
            result.errors.push(err.to_string());
            return result;
        }
        if result.is_aborted() {
            return result;
        }

        progress.make_progress(99, Some("complete"), "Associating workflow scheme");
        if let Err(err) = complete_migration(self.repository.as_ref(), context) {
            tracing::error!(error = %err, "could not complete migration");
            result.status = MigrationStatus::Aborted;
            result.errors.push(err.to_string());
            return result;
        }

        result.status = if result.failed_issues.is_empty() {
            MigrationStatus::Success
        } else {
            MigrationStatus::SuccessWithFailures
        };
        progress.make_progress(100, None, "Done");
        tracing::info!(
            status = ?result.status,
            migrated = result.migrated,
            skipped = result.skipped,
            failed = result.failed_issues.len(),
            "workflow migration finished"
        );
        result
    }

    fn check_still_exists(&self, context: &MigrationContext) -> Result<(), SchemeError> {
        match context {
            MigrationContext::Assignable(m) => self.repository.scheme(m.target.id).map(|_| ()),
            MigrationContext::Draft(m) => self.repository.draft(m.draft.id).map(|_| ()),
        }
    }

    async fn count(&self, query: &IssueQuery) -> Result<u64, SearchError> {
        if query.is_empty() {
            return Ok(0);
        }
        self.search.count_issues(query).await
    }

    async fn verify(
        &self,
        query: &IssueQuery,
        plan: &mut Plan<'_>,
        total: u64,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<String>, SearchError> {
        let steps = StepSink::new(progress, 6, 10, total);
        let mut errors = Vec::new();
        let mut seen = 0;
        let mut pager = Pager::new(self.search.as_ref(), query, self.config.page_size);
        while let Some(ids) = pager.next_page().await? {
            for id in ids {
                seen += 1;
                steps.make_progress(seen, Some("verify"), "Verifying issues");
                let issue = match self.store.issue(id).await {
                    Ok(Some(issue)) => issue,
                    Ok(None) => continue,
                    Err(err) => {
                        // the migrate phase records store failures per issue
                        tracing::debug!(issue = %id, error = %err, "could not load issue during verification");
                        continue;
                    }
                };
                match plan.decide(&issue) {
                    Ok(IssuePlan::Unmappable { status, workflow }) => errors.push(format!(
                        "issue {} ({}) has status '{status}' with no mapping into workflow '{workflow}'",
                        issue.key, issue.issue_type
                    )),
                    Ok(_) => {}
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }
        Ok(errors)
    }

    async fn migrate_all(
        &self,
        query: &IssueQuery,
        plan: &mut Plan<'_>,
        total: u64,
        progress: &dyn ProgressSink,
        result: &mut MigrationResult,
    ) -> Result<(), SearchError> {
        let steps = StepSink::new(progress, 23, 75, total);
        let mut done = 0;
        let mut pager = Pager::new(self.search.as_ref(), query, self.config.page_size);
        while let Some(ids) = pager.next_page().await? {
            for id in ids {
                if let Err(reason) = self.migrate_one(id, plan, result).await {
                    tracing::warn!(issue = %id, reason = %reason, "issue migration failed");
                    result.failed_issues.insert(id, reason);
                    if self
                        .config
                        .max_failed_issues
                        .is_some_and(|max| result.failed_issues.len() >= max)
                    {
                        tracing::error!(failed = result.failed_issues.len(), "too many failed issues, aborting migration");
                        result.status = MigrationStatus::Aborted;
                        result
                            .errors
                            .push(format!("aborted after {} failed issue(s)", result.failed_issues.len()));
                        return Ok(());
                    }
                }
                done += 1;
                steps.make_progress(done, Some("migrate"), &format!("Migrated {done} of {total} issue(s)"));
            }
        }
        Ok(())
    }

    async fn migrate_one(&self, id: IssueId, plan: &mut Plan<'_>, result: &mut MigrationResult) -> Result<(), String> {
        let Some(issue) = self.store.issue(id).await.map_err(|e| e.to_string())? else {
            tracing::debug!(issue = %id, "issue deleted during migration, skipping");
            result.skipped += 1;
            return Ok(());
        };
        match plan.decide(&issue).map_err(|e| e.to_string())? {
            IssuePlan::Unchanged => {
                tracing::debug!(issue = %issue.key, "issue already on target workflow");
                result.skipped += 1;
                Ok(())
            }
            IssuePlan::Unmappable { status, workflow } => Err(format!(
                "status '{status}' has no mapping into workflow '{workflow}'"
            )),
            IssuePlan::Migrate { workflow, status } => {
                tracing::debug!(issue = %issue.key, from = %issue.status, to = %status, workflow = %workflow, "migrating issue");
                self.store
                    .migrate_issue(id, &workflow, &status)
                    .await
                    .map_err(|e| e.to_string())?;
                result.migrated += 1;
                Ok(())
            }
        }
    }
}

/// Associate the target scheme or publish the draft
///
/// # Errors
/// Propagates repository errors (e.g. the scheme was deleted meanwhile).
pub fn complete_migration(repository: &dyn SchemeRepository, context: &MigrationContext) -> Result<(), SchemeError> {
    match context {
        MigrationContext::Assignable(m) => {
            // make sure the scheme still exists before touching any project
            repository.scheme(m.target.id)?;
            for project in &m.projects {
                repository.assign_scheme(project.id, Some(m.target.id))?;
            }
            tracing::info!(scheme = %m.target.id, projects = m.projects.len(), "associated workflow scheme");
        }
        MigrationContext::Draft(m) => {
            repository.promote_draft(m.draft.id)?;
        }
    }
    Ok(())
}

fn abort_on_search(err: &SearchError) -> MigrationResult {
    tracing::error!(error = %err, "issue search failed, aborting migration");
    MigrationResult::aborted(vec![err.to_string()])
}
