//! Migration mapping builder
//!
//! Works out which issue types change workflow and which of their statuses
//! have no equivalent in the new workflow, then checks the admin-supplied
//! [`StatusMapping`] covers every one of them.

use crate::context::MigrationContext;
use crate::error::{MappingProblem, MigrationError, SearchError, ValidationErrors};
use crate::issues::{IssueQuery, IssueSearch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wfm_scheme::{IssueTypeId, SchemeError, StatusId, Workflow, WorkflowRegistry};

/// Admin-chosen target status per `(issue type, old status)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMapping {
    targets: BTreeMap<IssueTypeId, BTreeMap<StatusId, StatusId>>,
}

impl StatusMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With `issue_type` issues in `from` moved to `to`
    #[must_use]
    pub fn with(
        mut self,
        issue_type: impl Into<IssueTypeId>,
        from: impl Into<StatusId>,
        to: impl Into<StatusId>,
    ) -> Self {
        self.insert(issue_type.into(), from.into(), to.into());
        self
    }

    pub fn insert(&mut self, issue_type: IssueTypeId, from: StatusId, to: StatusId) {
        self.targets.entry(issue_type).or_default().insert(from, to);
    }

    #[must_use]
    pub fn target(&self, issue_type: &IssueTypeId, status: &StatusId) -> Option<&StatusId> {
        self.targets.get(issue_type)?.get(status)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(issue type, from, to)` triples in order
    pub fn iter(&self) -> impl Iterator<Item = (&IssueTypeId, &StatusId, &StatusId)> {
        self.targets
            .iter()
            .flat_map(|(t, m)| m.iter().map(move |(from, to)| (t, from, to)))
    }
}

/// An `(issue type, old status)` pair that needs a target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequiredMapping {
    pub issue_type: IssueTypeId,
    pub status: StatusId,
}

/// Old and new workflow of one issue type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowChange {
    pub old: Workflow,
    pub new: Workflow,
}

impl WorkflowChange {
    /// Steps of the old workflow that are not steps of the new one
    #[must_use]
    pub fn orphaned_statuses(&self) -> Vec<StatusId> {
        self.old
            .statuses
            .iter()
            .filter(|s| !self.new.has_status(s))
            .cloned()
            .collect()
    }
}

/// Derives the required status mappings of a [`MigrationContext`]
#[derive(Debug, Clone, Copy)]
pub struct MappingBuilder<'a> {
    context: &'a MigrationContext,
    workflows: &'a WorkflowRegistry,
}

impl<'a> MappingBuilder<'a> {
    #[must_use]
    pub fn new(context: &'a MigrationContext, workflows: &'a WorkflowRegistry) -> Self {
        Self { context, workflows }
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &'a MigrationContext {
        self.context
    }

    #[inline]
    #[must_use]
    pub fn workflows(&self) -> &'a WorkflowRegistry {
        self.workflows
    }

    /// Old scheme equals new scheme
    #[inline]
    #[must_use]
    pub fn do_nothing(&self) -> bool {
        self.context.is_no_op()
    }

    /// Issue types in scope whose workflow name changes, sorted
    #[must_use]
    pub fn types_needing_migration(&self) -> Vec<IssueTypeId> {
        if self.do_nothing() {
            return Vec::new();
        }
        let old = self.context.old_mappings();
        let new = self.context.new_mappings();
        self.context
            .issue_types()
            .into_iter()
            .filter(|t| old.actual_workflow(t) != new.actual_workflow(t))
            .collect()
    }

    /// Old and new workflow for `issue_type`; `None` if it keeps its workflow
    ///
    /// # Errors
    /// `WorkflowNotFound` if either scheme names an unregistered workflow.
    pub fn workflow_change(&self, issue_type: &IssueTypeId) -> Result<Option<WorkflowChange>, SchemeError> {
        let old = self.context.old_mappings().actual_workflow(issue_type);
        let new = self.context.new_mappings().actual_workflow(issue_type);
        if old == new {
            return Ok(None);
        }
        Ok(Some(WorkflowChange {
            old: self.workflows.require(old)?,
            new: self.workflows.require(new)?,
        }))
    }

    /// Statuses of the old workflow that the new workflow lacks
    ///
    /// # Errors
    /// `WorkflowNotFound` if either scheme names an unregistered workflow.
    pub fn statuses_needing_migration(&self, issue_type: &IssueTypeId) -> Result<Vec<StatusId>, SchemeError> {
        if self.do_nothing() {
            return Ok(Vec::new());
        }
        Ok(self
            .workflow_change(issue_type)?
            .map(|change| change.orphaned_statuses())
            .unwrap_or_default())
    }

    /// Every pair the admin has to map
    ///
    /// # Errors
    /// `WorkflowNotFound` if either scheme names an unregistered workflow.
    pub fn required_mappings(&self) -> Result<Vec<RequiredMapping>, SchemeError> {
        let mut required = Vec::new();
        for issue_type in self.types_needing_migration() {
            for status in self.statuses_needing_migration(&issue_type)? {
                required.push(RequiredMapping {
                    issue_type: issue_type.clone(),
                    status,
                });
            }
        }
        Ok(required)
    }

    /// Statuses offered as targets for `issue_type`
    ///
    /// # Errors
    /// `WorkflowNotFound` if the new scheme names an unregistered workflow.
    pub fn target_statuses(&self, issue_type: &IssueTypeId) -> Result<Vec<StatusId>, SchemeError> {
        let name = self.context.new_mappings().actual_workflow(issue_type);
        Ok(self.workflows.require(name)?.statuses)
    }

    /// Query for the issues in scope whose type changes workflow
    #[must_use]
    pub fn affected_query(&self) -> IssueQuery {
        IssueQuery::for_projects(self.context.project_ids()).with_issue_types(self.types_needing_migration())
    }

    /// Issues of `issue_type` in scope that change workflow
    ///
    /// # Errors
    /// Propagates search failures.
    pub async fn num_affected_issues(
        &self,
        search: &dyn IssueSearch,
        issue_type: &IssueTypeId,
    ) -> Result<u64, SearchError> {
        if !self.types_needing_migration().contains(issue_type) {
            return Ok(0);
        }
        let query = IssueQuery::for_projects(self.context.project_ids()).with_issue_types([issue_type.clone()]);
        search.count_issues(&query).await
    }

    /// # Errors
    /// Propagates search failures.
    pub async fn total_affected_issues(&self, search: &dyn IssueSearch) -> Result<u64, SearchError> {
        let query = self.affected_query();
        if query.is_empty() {
            return Ok(0);
        }
        search.count_issues(&query).await
    }

    /// # Errors
    /// Propagates search failures.
    pub async fn have_issues_to_migrate(&self, search: &dyn IssueSearch) -> Result<bool, SearchError> {
        Ok(self.total_affected_issues(search).await? > 0)
    }

    /// Check `mapping` covers every required pair with a valid target
    ///
    /// Entries for pairs that need no mapping are ignored.
    ///
    /// # Errors
    /// `Validation` listing every problem, or `Scheme` if a workflow is missing.
    pub fn validate(&self, mapping: &StatusMapping) -> Result<(), MigrationError> {
        let mut errors = ValidationErrors::new();
        for issue_type in self.types_needing_migration() {
            let Some(change) = self.workflow_change(&issue_type)? else {
                continue;
            };
            for status in change.orphaned_statuses() {
                match mapping.target(&issue_type, &status) {
                    None => errors.push(MappingProblem::Missing {
                        issue_type: issue_type.clone(),
                        status,
                    }),
                    Some(target) if !change.new.has_status(target) => {
                        errors.push(MappingProblem::InvalidTarget {
                            issue_type: issue_type.clone(),
                            status,
                            target: target.clone(),
                            workflow: change.new.name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        errors.into_result().map_err(MigrationError::Validation)
    }
}
