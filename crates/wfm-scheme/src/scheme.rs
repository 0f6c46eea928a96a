//! Workflow schemes: assignable schemes, their drafts, and the mapping from
//! issue type to workflow name they both carry.

use crate::ids::{IssueTypeId, SchemeId};
use crate::workflow::SYSTEM_WORKFLOW;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Issue type → workflow name, with an optional catch-all default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMappings {
    /// Workflow for issue types without an explicit entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Explicit per-issue-type workflows
    #[serde(default)]
    pub by_type: BTreeMap<IssueTypeId, String>,
}

impl WorkflowMappings {
    /// Empty mappings (everything resolves to the system workflow)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a default workflow
    #[must_use]
    pub fn with_default(mut self, workflow: impl Into<String>) -> Self {
        self.default = Some(workflow.into());
        self
    }

    /// With an explicit mapping for one issue type
    #[must_use]
    pub fn with_mapping(mut self, issue_type: impl Into<IssueTypeId>, workflow: impl Into<String>) -> Self {
        self.by_type.insert(issue_type.into(), workflow.into());
        self
    }

    /// Workflow name for `issue_type`: explicit, then default, then system
    #[must_use]
    pub fn actual_workflow(&self, issue_type: &IssueTypeId) -> &str {
        self.by_type
            .get(issue_type)
            .or(self.default.as_ref())
            .map_or(SYSTEM_WORKFLOW, String::as_str)
    }

    /// Every workflow name referenced by these mappings
    pub fn workflow_names(&self) -> impl Iterator<Item = &str> {
        self.default
            .iter()
            .chain(self.by_type.values())
            .map(String::as_str)
    }

    /// Replace every use of one workflow name with another
    pub fn rename_workflow(&mut self, old: &str, new: &str) {
        if self.default.as_deref() == Some(old) {
            self.default = Some(new.to_string());
        }
        for workflow in self.by_type.values_mut() {
            if workflow == old {
                *workflow = new.to_string();
            }
        }
    }
}

/// A scheme that can be associated with projects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignableWorkflowScheme {
    pub id: SchemeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub mappings: WorkflowMappings,
}

impl AssignableWorkflowScheme {
    /// The implicit scheme used by projects with no scheme of their own
    #[must_use]
    pub fn system_default() -> Self {
        Self {
            id: SchemeId::DEFAULT,
            name: "Default Workflow Scheme".to_string(),
            description: None,
            mappings: WorkflowMappings::new().with_default(SYSTEM_WORKFLOW),
        }
    }

    /// Whether this is the system default scheme
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.id.is_default()
    }
}

/// Staging copy of an assignable scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftWorkflowScheme {
    pub id: SchemeId,
    pub parent_id: SchemeId,
    /// Name of the parent at the time the draft was read
    pub name: String,
    pub mappings: WorkflowMappings,
    pub last_modified_by: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Either kind of workflow scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowScheme {
    Assignable(AssignableWorkflowScheme),
    Draft(DraftWorkflowScheme),
}

impl WorkflowScheme {
    #[must_use]
    pub fn id(&self) -> SchemeId {
        match self {
            Self::Assignable(s) => s.id,
            Self::Draft(d) => d.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Assignable(s) => &s.name,
            Self::Draft(d) => &d.name,
        }
    }

    #[must_use]
    pub fn mappings(&self) -> &WorkflowMappings {
        match self {
            Self::Assignable(s) => &s.mappings,
            Self::Draft(d) => &d.mappings,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }

    /// Id of the scheme whose locks guard this one: drafts share their parent's
    #[must_use]
    pub fn lock_id(&self) -> SchemeId {
        match self {
            Self::Assignable(s) => s.id,
            Self::Draft(d) => d.parent_id,
        }
    }

    /// Workflow name for `issue_type`
    #[must_use]
    pub fn actual_workflow(&self, issue_type: &IssueTypeId) -> &str {
        self.mappings().actual_workflow(issue_type)
    }
}

impl From<AssignableWorkflowScheme> for WorkflowScheme {
    fn from(scheme: AssignableWorkflowScheme) -> Self {
        Self::Assignable(scheme)
    }
}

impl From<DraftWorkflowScheme> for WorkflowScheme {
    fn from(draft: DraftWorkflowScheme) -> Self {
        Self::Draft(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actual_workflow_falls_back() {
        let mappings = WorkflowMappings::new()
            .with_default("W-default")
            .with_mapping("Bug", "W1");

        assert_eq!(mappings.actual_workflow(&"Bug".into()), "W1");
        assert_eq!(mappings.actual_workflow(&"Task".into()), "W-default");
        assert_eq!(
            WorkflowMappings::new().actual_workflow(&"Task".into()),
            SYSTEM_WORKFLOW
        );
    }

    #[test]
    fn rename_touches_default_and_types() {
        let mut mappings = WorkflowMappings::new()
            .with_default("old")
            .with_mapping("Bug", "old")
            .with_mapping("Task", "keep");
        mappings.rename_workflow("old", "new");

        assert_eq!(mappings.default.as_deref(), Some("new"));
        assert_eq!(mappings.actual_workflow(&"Bug".into()), "new");
        assert_eq!(mappings.actual_workflow(&"Task".into()), "keep");
    }

    #[test]
    fn draft_locks_parent() {
        let draft = WorkflowScheme::Draft(DraftWorkflowScheme {
            id: SchemeId(11),
            parent_id: SchemeId(3),
            name: "Software".into(),
            mappings: WorkflowMappings::new(),
            last_modified_by: None,
            last_modified: Utc::now(),
        });
        assert!(draft.is_draft());
        assert_eq!(draft.lock_id(), SchemeId(3));
    }
}
